//! Worker-level configuration
//!
//! Supports loading config from:
//! - An explicit `--config` file
//! - ~/.config/qfarm/worker.toml
//! - Environment variables (highest priority)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Directory repositories are fetched into (`<root>/<repo id>`)
    pub download_root: PathBuf,

    /// Broker connection string
    pub redis_url: String,

    /// Broker password, if the server requires AUTH
    pub redis_password: Option<String>,

    /// Skip analysis when the commit equals the last analyzed one
    pub check_last_commit_hash: bool,

    /// Channel broadcast events are published on
    pub events_channel: String,

    /// Upper bound on how long the consumer waits for a signal before
    /// polling the work list anyway
    pub poll_interval_secs: u64,

    /// Fetch command template; `{repo}` is replaced with the repository id
    pub fetch_command: Vec<String>,

    pub queue: QueueConfig,

    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Pub/sub channel producers signal on
    pub channel: String,
    /// Work list holding repository ids
    pub list: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub fetch_secs: u64,
    pub lint_secs: u64,
    pub coverage_secs: u64,
    /// Read/write timeout on broker sockets
    pub broker_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            download_root: default_download_root(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_password: None,
            check_last_commit_hash: true,
            events_channel: "events".to_string(),
            poll_interval_secs: 5,
            fetch_command: ["go", "get", "-u", "-t", "{repo}/..."]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            queue: QueueConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            channel: "test-q-channel".to_string(),
            list: "test-q-list".to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: 600,
            lint_secs: 600,
            coverage_secs: 900,
            broker_ms: 5000,
        }
    }
}

/// `$GOPATH/src`, falling back to `~/go/src`.
fn default_download_root() -> PathBuf {
    if let Some(gopath) = std::env::var_os("GOPATH").filter(|v| !v.is_empty()) {
        // GOPATH may hold several entries; go get writes into the first
        if let Some(first) = std::env::split_paths(&gopath).next() {
            return first.join("src");
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("go")
        .join("src")
}

impl WorkerConfig {
    /// Load config from all sources, with priority:
    /// 1. Environment variables (highest)
    /// 2. Explicit file, or the user config file if present
    /// 3. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::user_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => WorkerConfig::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read worker config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse worker config {}", path.display()))
    }

    /// Get the user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("qfarm").join("worker.toml"))
    }

    /// Environment variables override everything
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(root) = var("QFARM_DOWNLOAD_ROOT").filter(|v| !v.is_empty()) {
            self.download_root = PathBuf::from(root);
        }
        if let Some(url) = var("QFARM_REDIS_URL").filter(|v| !v.is_empty()) {
            self.redis_url = url;
        }
        if let Some(pass) = var("QFARM_REDIS_PASSWORD").filter(|v| !v.is_empty()) {
            self.redis_password = Some(pass);
        }
        if let Some(flag) = var("QFARM_CHECK_LAST_COMMIT") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.check_last_commit_hash = true,
                "0" | "false" | "no" | "off" => self.check_last_commit_hash = false,
                other => tracing::warn!("Ignoring QFARM_CHECK_LAST_COMMIT={:?}", other),
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.broker_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(config.check_last_commit_hash);
        assert_eq!(config.queue.channel, "test-q-channel");
        assert_eq!(config.queue.list, "test-q-list");
        assert_eq!(config.fetch_command[0], "go");
        assert!(config.download_root.ends_with("src"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: WorkerConfig = toml::from_str(
            r#"
redis_url = "redis://broker:6380"
check_last_commit_hash = false

[timeouts]
fetch_secs = 30
"#,
        )
        .unwrap();
        assert_eq!(config.redis_url, "redis://broker:6380");
        assert!(!config.check_last_commit_hash);
        assert_eq!(config.timeouts.fetch_secs, 30);
        assert_eq!(config.timeouts.lint_secs, 600);
        assert_eq!(config.queue.list, "test-q-list");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("QFARM_DOWNLOAD_ROOT", "/srv/checkouts"),
            ("QFARM_REDIS_PASSWORD", "hunter2"),
            ("QFARM_CHECK_LAST_COMMIT", "off"),
        ]
        .into_iter()
        .collect();

        let mut config = WorkerConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.download_root, PathBuf::from("/srv/checkouts"));
        assert_eq!(config.redis_password.as_deref(), Some("hunter2"));
        assert!(!config.check_last_commit_hash);
    }
}
