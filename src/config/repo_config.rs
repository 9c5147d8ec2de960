//! Per-repository build configuration
//!
//! Loaded from `.qfarm.toml` in the checkout root. A missing file means
//! "analyze everything with the default tools".
//!
//! # Configuration Format
//!
//! ```toml
//! # .qfarm.toml
//! path = "."
//! exclude = ["generated/**", "**/*.pb.go"]
//!
//! [lint]
//! enabled = true
//! command = ["gometalinter", "--json", "./..."]
//!
//! [coverage]
//! enabled = true
//! command = ["go", "test", "-json", "-coverprofile=.qfarm/cover.out", "./..."]
//! profile = ".qfarm/cover.out"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::models::RepoId;

/// File name looked up in the checkout root.
pub const REPO_CONFIG_FILE: &str = ".qfarm.toml";

/// Exclusions applied unless `skip_default_excludes = true`.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "vendor/**",
    "**/vendor/**",
    "**/node_modules/**",
    "**/third_party/**",
    "**/testdata/**",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Repository id; always overwritten with the job's id on load
    pub repo: String,

    /// Subdirectory (relative to the checkout) the tree is rooted at
    pub path: String,

    /// Extra glob patterns excluded from the tree
    pub exclude: Vec<String>,

    pub skip_default_excludes: bool,

    pub lint: LintConfig,

    pub coverage: CoverageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    pub enabled: bool,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    pub enabled: bool,
    pub command: Vec<String>,
    /// Cover profile written by the command, relative to the checkout
    pub profile: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            path: ".".to_string(),
            exclude: Vec::new(),
            skip_default_excludes: false,
            lint: LintConfig::default(),
            coverage: CoverageConfig::default(),
        }
    }
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: strings(&["gometalinter", "--json", "./..."]),
        }
    }
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: strings(&[
                "go",
                "test",
                "-json",
                "-coverprofile=.qfarm/cover.out",
                "./...",
            ]),
            profile: ".qfarm/cover.out".to_string(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl RepoConfig {
    /// Load `.qfarm.toml` from the checkout, falling back to defaults.
    pub fn load(repo: &RepoId, checkout: &Path) -> PipelineResult<Self> {
        let file = checkout.join(REPO_CONFIG_FILE);
        let mut config = if file.is_file() {
            let content = std::fs::read_to_string(&file)?;
            toml::from_str::<RepoConfig>(&content).map_err(|e| {
                PipelineError::Config(format!("{}: {}", file.display(), e.message()))
            })?
        } else {
            debug!("No {} in {}, using defaults", REPO_CONFIG_FILE, repo);
            RepoConfig::default()
        };

        config.repo = repo.to_string();
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would point the tree or tools outside the checkout.
    pub fn validate(&self) -> PipelineResult<()> {
        if !is_contained(&self.path) {
            return Err(PipelineError::Config(format!(
                "path {:?} must be relative and stay inside the repository",
                self.path
            )));
        }
        if self.coverage.enabled {
            if !is_contained(&self.coverage.profile) {
                return Err(PipelineError::Config(format!(
                    "coverage profile {:?} must be relative and stay inside the repository",
                    self.coverage.profile
                )));
            }
            if self.coverage.command.is_empty() {
                return Err(PipelineError::Config("coverage command is empty".into()));
            }
        }
        if self.lint.enabled && self.lint.command.is_empty() {
            return Err(PipelineError::Config("lint command is empty".into()));
        }
        Ok(())
    }

    /// Directory the tree is rooted at.
    pub fn root_dir(&self, checkout: &Path) -> PathBuf {
        let rel = Path::new(&self.path);
        if rel.components().all(|c| matches!(c, Component::CurDir)) {
            checkout.to_path_buf()
        } else {
            checkout.join(rel)
        }
    }

    /// Exclusion globs including the built-in defaults.
    pub fn effective_excludes(&self) -> Vec<String> {
        let mut patterns: Vec<String> = if self.skip_default_excludes {
            Vec::new()
        } else {
            strings(DEFAULT_EXCLUDE_PATTERNS)
        };
        patterns.extend(self.exclude.iter().cloned());
        patterns
    }
}

fn is_contained(path: &str) -> bool {
    let p = Path::new(path);
    !p.is_absolute()
        && p
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
