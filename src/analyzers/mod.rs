//! Analyzer adapters
//!
//! Each adapter wraps an external engine (a linter, a test runner) and
//! annotates leaf nodes of the [`FileTree`] with the raw numbers it
//! reports. Directories are left alone; the pipeline aggregates afterwards.
//!
//! # Architecture
//!
//! Adapters follow a common pattern:
//! 1. Run the command from the repository's `.qfarm.toml` (or the default)
//!    in the checkout via [`external_tool::run_external_tool`]
//! 2. Parse the tool's output
//! 3. Attribute results to files in the tree, ignoring excluded files
//! 4. Return per-file issues for persistence

pub mod coverage;
pub mod external_tool;
pub mod lint;

pub use coverage::CoverageAnalyzer;
pub use lint::LintAnalyzer;

use std::path::Path;

use crate::config::{RepoConfig, TimeoutConfig};
use crate::error::PipelineResult;
use crate::models::{Issue, RepoId};
use crate::tree::FileTree;

/// What an adapter gets to know about the build.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub repo: &'a RepoId,
    pub checkout: &'a Path,
    pub config: &'a RepoConfig,
}

/// Trait for analyzer adapters
pub trait Analyzer: Send + Sync {
    /// Short name used in logs and error messages
    fn name(&self) -> &'static str;

    /// Whether the repository's config turns this adapter on
    fn is_enabled(&self, _config: &RepoConfig) -> bool {
        true
    }

    /// Annotate leaves of `tree` and return the issues found.
    ///
    /// A failure here aborts the build.
    fn analyze(&self, ctx: &AnalysisContext<'_>, tree: &mut FileTree)
        -> PipelineResult<Vec<Issue>>;
}

/// Lint then coverage, with the worker's time budgets.
pub fn default_analyzers(timeouts: &TimeoutConfig) -> Vec<Box<dyn Analyzer>> {
    vec![
        Box::new(LintAnalyzer::new(timeouts.lint_secs)),
        Box::new(CoverageAnalyzer::new(timeouts.coverage_secs)),
    ]
}
