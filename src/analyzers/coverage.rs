//! Test coverage adapter
//!
//! Runs the test suite with a cover profile, then reads three things:
//!
//! - statements and covered statements per file, from the profile
//! - test counts, from `func TestXxx(` declarations in `_test.go` files
//! - passes and failures of top-level tests, from the `test2json` stream
//!   the command prints on stdout
//!
//! A failing test suite still produces a profile; only a missing or
//! unreadable profile fails the build.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::external_tool::run_external_tool;
use super::{AnalysisContext, Analyzer};
use crate::config::RepoConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Issue, RepoId};
use crate::tree::FileTree;

const TOOL_NAME: &str = "coverage";

static TEST_FUNC: OnceLock<Regex> = OnceLock::new();

fn test_func() -> &'static Regex {
    TEST_FUNC.get_or_init(|| {
        Regex::new(r"(?m)^func\s+(Test(?:[A-Z0-9_]\w*)?)\s*\(").expect("valid regex")
    })
}

/// Statement counts for one file of a cover profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCoverage {
    pub statements: u64,
    pub covered: u64,
}

/// One `test2json` event; only the fields we use.
#[derive(Debug, Deserialize)]
struct TestEvent {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Package", default)]
    package: String,
    #[serde(rename = "Test", default)]
    test: Option<String>,
}

/// Final state of a top-level test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub package: String,
    pub test: String,
    pub passed: bool,
}

pub struct CoverageAnalyzer {
    timeout_secs: u64,
}

impl CoverageAnalyzer {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl Analyzer for CoverageAnalyzer {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn is_enabled(&self, config: &RepoConfig) -> bool {
        config.coverage.enabled
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>, tree: &mut FileTree) -> PipelineResult<Vec<Issue>> {
        let profile = ctx.checkout.join(&ctx.config.coverage.profile);
        // A profile from an earlier build must not be mistaken for this one
        if profile.exists() {
            std::fs::remove_file(&profile)?;
        }
        if let Some(parent) = profile.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = run_external_tool(
            &ctx.config.coverage.command,
            TOOL_NAME,
            self.timeout_secs,
            Some(ctx.checkout),
            None,
        )
        .into_result(TOOL_NAME, self.timeout_secs)?;

        if !profile.is_file() {
            return Err(PipelineError::tool(
                TOOL_NAME,
                format!(
                    "no cover profile at {} ({})",
                    ctx.config.coverage.profile,
                    result.failure_text()
                ),
            ));
        }

        let content = std::fs::read_to_string(&profile)?;
        let per_file = parse_profile(&content)?;
        apply_coverage(tree, ctx.repo, &per_file);

        let declared = count_declared_tests(tree);
        let outcomes = parse_test_events(&result.stdout);
        apply_outcomes(tree, ctx.repo, &declared, &outcomes);

        info!(
            "Coverage for {}: {} files profiled, {} tests run",
            ctx.repo,
            per_file.len(),
            outcomes.len()
        );
        Ok(Vec::new())
    }
}

/// Parse a Go cover profile into per-file statement counts.
///
/// Blocks listed more than once (one entry per test binary that compiled
/// the file) are merged, keeping the highest hit count.
pub fn parse_profile(content: &str) -> PipelineResult<BTreeMap<String, FileCoverage>> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    match lines.next() {
        Some(header) if header.starts_with("mode:") => {}
        _ => {
            return Err(PipelineError::tool(
                TOOL_NAME,
                "cover profile has no mode header",
            ))
        }
    }

    let mut blocks: HashMap<(String, String), (u64, u64)> = HashMap::new();
    for line in lines {
        let (file, block, stmts, count) = parse_block(line).ok_or_else(|| {
            PipelineError::tool(TOOL_NAME, format!("bad cover profile line: {}", line))
        })?;
        let entry = blocks.entry((file, block)).or_insert((stmts, 0));
        entry.1 = entry.1.max(count);
    }

    let mut per_file: BTreeMap<String, FileCoverage> = BTreeMap::new();
    for ((file, _), (stmts, count)) in blocks {
        let cov = per_file.entry(file).or_default();
        cov.statements += stmts;
        if count > 0 {
            cov.covered += stmts;
        }
    }
    Ok(per_file)
}

/// `name.go:3.14,5.2 2 1` -> (name.go, 3.14,5.2, 2, 1)
fn parse_block(line: &str) -> Option<(String, String, u64, u64)> {
    let mut parts = line.trim().rsplitn(3, ' ');
    let count = parts.next()?.parse().ok()?;
    let stmts = parts.next()?.parse().ok()?;
    let (file, block) = parts.next()?.rsplit_once(':')?;
    Some((file.to_string(), block.to_string(), stmts, count))
}

/// Map an import-path style file or package name to a checkout-relative
/// path. Absolute paths (module mode outside GOPATH) are passed through.
fn import_path_to_relative(tree: &FileTree, repo: &RepoId, name: &str) -> Option<PathBuf> {
    if Path::new(name).is_absolute() {
        return tree.resolve_relative(name);
    }
    let prefix = repo.as_str();
    if name == prefix {
        return Some(tree.checkout().to_path_buf());
    }
    let rel = name.strip_prefix(prefix)?.strip_prefix('/')?;
    tree.resolve_relative(rel)
}

fn apply_coverage(tree: &mut FileTree, repo: &RepoId, per_file: &BTreeMap<String, FileCoverage>) {
    for (name, cov) in per_file {
        let Some(path) = import_path_to_relative(tree, repo, name) else {
            debug!("Cover profile entry outside {}: {}", repo, name);
            continue;
        };
        let Some(leaf) = tree.leaf_mut(&path) else {
            debug!("Cover profile entry for untracked file {}", name);
            continue;
        };
        leaf.statements = cov.statements;
        leaf.covered_statements = cov.covered;
        leaf.coverage = leaf.weighted_coverage();
    }
}

/// Test function names per `_test.go` file, counted onto the file's leaf.
fn count_declared_tests(tree: &mut FileTree) -> HashMap<(PathBuf, String), PathBuf> {
    let test_files: Vec<PathBuf> = tree
        .files()
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().ends_with("_test.go"))
                .unwrap_or(false)
        })
        .map(Path::to_path_buf)
        .collect();

    let mut by_name = HashMap::new();
    for file in test_files {
        let source = match std::fs::read_to_string(&file) {
            Ok(source) => source,
            Err(e) => {
                warn!("Can't read {}: {}", file.display(), e);
                continue;
            }
        };
        let names = declared_tests(&source);
        if let Some(leaf) = tree.leaf_mut(&file) {
            leaf.tests_no = names.len() as u64;
        }
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        for name in names {
            by_name.insert((dir.clone(), name), file.clone());
        }
    }
    by_name
}

/// Names of `func TestXxx(` declarations in Go source.
pub fn declared_tests(source: &str) -> Vec<String> {
    test_func()
        .captures_iter(source)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Final pass/fail of every top-level test in a `test2json` stream.
///
/// Lines that aren't JSON (build output mixed into stdout) are skipped.
pub fn parse_test_events(stdout: &str) -> Vec<TestOutcome> {
    let mut outcomes = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(event) = serde_json::from_str::<TestEvent>(line) else {
            continue;
        };
        let Some(test) = event.test else {
            continue;
        };
        if test.contains('/') {
            continue;
        }
        let passed = match event.action.as_str() {
            "pass" => true,
            "fail" => false,
            _ => continue,
        };
        outcomes.push(TestOutcome {
            package: event.package,
            test,
            passed,
        });
    }
    outcomes
}

fn apply_outcomes(
    tree: &mut FileTree,
    repo: &RepoId,
    declared: &HashMap<(PathBuf, String), PathBuf>,
    outcomes: &[TestOutcome],
) {
    for outcome in outcomes {
        let Some(dir) = import_path_to_relative(tree, repo, &outcome.package) else {
            continue;
        };
        let Some(file) = declared.get(&(dir, outcome.test.clone())) else {
            debug!("No declaration found for {}.{}", outcome.package, outcome.test);
            continue;
        };
        if let Some(leaf) = tree.leaf_mut(file) {
            if outcome.passed {
                leaf.passed_no += 1;
            } else {
                leaf.failed_no += 1;
            }
        }
    }
}
