//! Core data models for qfarm
//!
//! These models are shared by the pipeline, the broker and the storage
//! layer. Everything that gets persisted or broadcast is serialized with
//! serde as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::RepoConfig;
use crate::error::PipelineError;

/// Validated repository identifier, e.g. `github.com/user/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId(String);

impl RepoId {
    /// Parse and validate a repository identifier.
    ///
    /// Requires `host/user/repo` (extra segments allowed), no empty, `.` or
    /// `..` segments, no leading slash and no whitespace.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let raw = raw.trim();
        let invalid = |reason: &str| PipelineError::InvalidRepo {
            repo: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty identifier"));
        }
        if raw.starts_with('/') {
            return Err(invalid("identifier must not be an absolute path"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(invalid("identifier must not contain whitespace"));
        }

        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() < 3 {
            return Err(invalid("expected host/user/repo"));
        }
        if segments
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == "..")
        {
            return Err(invalid("empty or relative path segment"));
        }

        Ok(Self(raw.to_string()))
    }

    /// Decode a raw work-list item.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, PipelineError> {
        let text = std::str::from_utf8(raw).map_err(|_| PipelineError::InvalidRepo {
            repo: String::from_utf8_lossy(raw).into_owned(),
            reason: "not valid UTF-8".to_string(),
        })?;
        Self::parse(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Owner segment (`user` in `host/user/repo`).
    pub fn user(&self) -> &str {
        // parse() guarantees at least three segments
        self.0.split('/').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RepoId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepoId> for String {
    fn from(id: RepoId) -> Self {
        id.0
    }
}

/// One analysis attempt for a repository at a specific commit.
#[derive(Debug, Clone)]
pub struct Build {
    pub repo: RepoId,
    pub commit_hash: String,
    pub started: DateTime<Utc>,
    pub no: u64,
    pub config: RepoConfig,
}

/// Persisted, immutable summary of a completed build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub repo: String,
    pub no: u64,
    pub score: u32,
    pub time: DateTime<Utc>,
    pub took: String,
    pub commit_hash: String,
    pub config: RepoConfig,
    pub coverage: f64,
    pub tests_no: u64,
    pub passed_no: u64,
    pub failed_no: u64,
    pub issues_no: u64,
    pub errors_no: u64,
    pub warnings_no: u64,
    pub technical_debt_cost: u64,
    pub technical_debt_time: String,
}

/// Quality metrics carried by every node.
///
/// Leaves get raw values from analyzers; directories get the aggregate of
/// their children (see [`crate::tree::FileTree::aggregate`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub coverage: f64,
    #[serde(default)]
    pub statements: u64,
    #[serde(default)]
    pub covered_statements: u64,
    pub tests_no: u64,
    pub passed_no: u64,
    pub failed_no: u64,
    pub issues_no: u64,
    pub errors_no: u64,
    pub warnings_no: u64,
}

impl Metrics {
    /// Statement-weighted coverage; 0.0 when nothing was measured.
    pub fn weighted_coverage(&self) -> f64 {
        if self.statements == 0 {
            return 0.0;
        }
        self.covered_statements as f64 * 100.0 / self.statements as f64
    }

    /// Add another node's counts into this one. Coverage is not touched.
    pub fn absorb(&mut self, other: &Metrics) {
        self.statements += other.statements;
        self.covered_statements += other.covered_statements;
        self.tests_no += other.tests_no;
        self.passed_no += other.passed_no;
        self.failed_no += other.failed_no;
        self.issues_no += other.issues_no;
        self.errors_no += other.errors_no;
        self.warnings_no += other.warnings_no;
    }
}

/// One file or directory of the analyzed tree, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub path: String,
    pub parent_path: String,
    pub dir: bool,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// Severity of a static-analysis issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    #[default]
    Warning,
}

impl IssueSeverity {
    /// Linters report free-form severities; only `error` counts as an error.
    pub fn from_label(label: &str) -> Self {
        if label.eq_ignore_ascii_case("error") {
            IssueSeverity::Error
        } else {
            IssueSeverity::Warning
        }
    }
}

/// A single static-analysis finding attributed to one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub linter: String,
    pub severity: IssueSeverity,
    pub path: String,
    pub line: u32,
    pub col: u32,
    pub message: String,
}

/// Kinds of lifecycle events broadcast to real-time subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    DownloadComplete,
    Error,
    AlreadyAnalyzed,
    AllDone,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::DownloadComplete => write!(f, "download-complete"),
            EventType::Error => write!(f, "error"),
            EventType::AlreadyAnalyzed => write!(f, "already-analyzed"),
            EventType::AllDone => write!(f, "all-done"),
        }
    }
}

/// Transient notification; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub repo: String,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Render a duration as `1h2m3.5s`.
///
/// Zero hours/minutes are omitted; seconds keep millisecond precision
/// without trailing zeros.
pub fn human_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let millis = total_ms % 60_000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }

    let secs = millis / 1000;
    let frac = millis % 1000;
    if frac == 0 {
        out.push_str(&format!("{}s", secs));
    } else {
        let frac = format!("{:03}", frac);
        out.push_str(&format!("{}.{}s", secs, frac.trim_end_matches('0')));
    }
    out
}
