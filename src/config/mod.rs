//! Configuration module for qfarm
//!
//! This module handles:
//! - Worker configuration (broker, download root, timeouts)
//! - Per-repository build configuration (.qfarm.toml)

mod repo_config;
mod worker_config;

pub use repo_config::{
    CoverageConfig, LintConfig, RepoConfig, DEFAULT_EXCLUDE_PATTERNS, REPO_CONFIG_FILE,
};
pub use worker_config::{QueueConfig, TimeoutConfig, WorkerConfig};
