//! Static-analysis adapter
//!
//! Runs a metalinter that prints its findings as a JSON array:
//!
//! ```json
//! [{"linter": "golint", "severity": "warning", "path": "pkg/a.go",
//!   "line": 12, "col": 2, "message": "exported func Foo should have comment"}]
//! ```
//!
//! Linters exit non-zero whenever they find something, so the exit status
//! is ignored; output that doesn't parse is a failure.

use serde::Deserialize;
use tracing::{debug, info};

use super::external_tool::run_external_tool;
use super::{AnalysisContext, Analyzer};
use crate::config::RepoConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Issue, IssueSeverity};
use crate::tree::FileTree;

const TOOL_NAME: &str = "lint";

#[derive(Debug, Deserialize)]
struct LintRecord {
    #[serde(default)]
    linter: String,
    #[serde(default)]
    severity: String,
    path: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    col: u32,
    #[serde(default)]
    message: String,
}

pub struct LintAnalyzer {
    timeout_secs: u64,
}

impl LintAnalyzer {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl Analyzer for LintAnalyzer {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn is_enabled(&self, config: &RepoConfig) -> bool {
        config.lint.enabled
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>, tree: &mut FileTree) -> PipelineResult<Vec<Issue>> {
        let result = run_external_tool(
            &ctx.config.lint.command,
            TOOL_NAME,
            self.timeout_secs,
            Some(ctx.checkout),
            None,
        )
        .into_result(TOOL_NAME, self.timeout_secs)?;

        let issues = parse_lint_output(&result.stdout).map_err(|e| {
            if !result.exit_ok() {
                PipelineError::tool(TOOL_NAME, result.failure_text())
            } else {
                e
            }
        })?;

        let attributed = apply_issues(tree, issues);
        info!("Lint found {} issues in {}", attributed.len(), ctx.repo);
        Ok(attributed)
    }
}

/// Parse metalinter JSON output. Empty output means no findings.
pub fn parse_lint_output(stdout: &str) -> PipelineResult<Vec<Issue>> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(Vec::new());
    }

    let records: Vec<LintRecord> = serde_json::from_str(stdout)
        .map_err(|e| PipelineError::tool(TOOL_NAME, format!("unreadable output: {}", e)))?;

    Ok(records
        .into_iter()
        .map(|r| Issue {
            severity: IssueSeverity::from_label(&r.severity),
            linter: r.linter,
            path: r.path,
            line: r.line,
            col: r.col,
            message: r.message,
        })
        .collect())
}

/// Count issues on the files they name.
///
/// Returns the issues that landed on a file of the tree, with paths
/// rewritten to the checkout-relative form. Findings for excluded or
/// unknown files are dropped.
pub fn apply_issues(tree: &mut FileTree, issues: Vec<Issue>) -> Vec<Issue> {
    let mut attributed = Vec::with_capacity(issues.len());
    for mut issue in issues {
        let Some(path) = tree.resolve_relative(&issue.path) else {
            debug!("Dropping issue outside checkout: {}", issue.path);
            continue;
        };
        let Ok(rel) = tree.relative(&path) else {
            continue;
        };
        let Some(leaf) = tree.leaf_mut(&path) else {
            debug!("Dropping issue for untracked file {}", rel);
            continue;
        };

        leaf.issues_no += 1;
        match issue.severity {
            IssueSeverity::Error => leaf.errors_no += 1,
            IssueSeverity::Warning => leaf.warnings_no += 1,
        }
        issue.path = rel;
        attributed.push(issue);
    }
    attributed
}
