//! Error types for the worker
//!
//! `StoreError` covers the broker (shared store, pub/sub). `PipelineError`
//! covers everything that can abort a single job; the consumer loop turns it
//! into an `error` event and moves on.

use thiserror::Error;

/// Errors raised by a broker backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("broker operation timed out")]
    Timeout,

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected for key {0}")]
    Rejected(String),
}

impl StoreError {
    /// Map a redis error, keeping socket timeouts distinguishable.
    pub fn from_redis(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Redis(err)
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that abort one analysis job.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("{step} timed out after {secs}s")]
    Timeout { step: String, secs: u64 },

    #[error("invalid repository identifier {repo:?}: {reason}")]
    InvalidRepo { repo: String, reason: String },

    #[error("can't resolve last commit: {0}")]
    Vcs(#[from] git2::Error),

    #[error("invalid repository configuration: {0}")]
    Config(String),

    #[error("storage failure while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("can't serialize {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("can't trim node path {path}: not inside checkout {root}")]
    PathOutsideCheckout { path: String, root: String },

    #[error("can't find tree root {0}")]
    MissingRoot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn storage(context: impl Into<String>, source: StoreError) -> Self {
        PipelineError::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        PipelineError::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this failure came from a step exceeding its time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PipelineError::Timeout { .. }
                | PipelineError::Storage {
                    source: StoreError::Timeout,
                    ..
                }
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_names_context() {
        let err = PipelineError::storage("setting reports:host/u/r:1", StoreError::Timeout);
        let text = err.to_string();
        assert!(text.contains("reports:host/u/r:1"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_timeout_distinct_from_tool() {
        let timeout = PipelineError::Timeout {
            step: "fetch".into(),
            secs: 5,
        };
        let tool = PipelineError::tool("fetch", "exit status 1");
        assert!(timeout.is_timeout());
        assert!(!tool.is_timeout());
        assert_eq!(timeout.to_string(), "fetch timed out after 5s");
    }
}
