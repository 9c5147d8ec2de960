//! Shared fixtures for integration tests

#![allow(dead_code)]

use git2::{Oid, Repository, Signature};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use qfarm::analyzers::{AnalysisContext, Analyzer};
use qfarm::broker::InMemoryBroker;
use qfarm::error::{PipelineError, PipelineResult};
use qfarm::models::{Issue, IssueSeverity, Metrics, RepoId};
use qfarm::notify::Notifier;
use qfarm::pipeline::{AnalysisPipeline, CommitResolver, ExistingCheckout, RepoFetcher};
use qfarm::tree::FileTree;

pub const EVENTS: &str = "events";

pub fn repo(id: &str) -> RepoId {
    RepoId::parse(id).unwrap()
}

/// A small Go-looking project committed to a fresh git repository.
pub fn go_project() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write(dir.path(), "main.go", "package main\n\nfunc main() {}\n");
    write(dir.path(), "pkg/util/util.go", "package util\n\nfunc Add(a, b int) int { return a + b }\n");
    write(
        dir.path(),
        "pkg/util/util_test.go",
        "package util\n\nfunc TestAdd(t *testing.T) {}\n",
    );
    write(dir.path(), "vendor/dep/dep.go", "package dep\n");
    write(
        dir.path(),
        ".qfarm.toml",
        "[lint]\nenabled = false\n\n[coverage]\nenabled = false\n",
    );
    commit_all(&repo, "initial");
    (dir, repo)
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub fn commit_all(repo: &Repository, message: &str) -> Oid {
    let sig = Signature::now("Test User", "test@example.com").unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

/// Resolver that reports a fixed commit regardless of the checkout.
pub struct FixedCommit(pub &'static str);

impl CommitResolver for FixedCommit {
    fn head_commit(&self, _checkout: &Path) -> PipelineResult<String> {
        Ok(self.0.to_string())
    }
}

/// Fetcher that fails for one repository and serves a local checkout for
/// every other.
pub struct SelectiveFetcher {
    pub failing: &'static str,
    pub checkout: PathBuf,
}

impl RepoFetcher for SelectiveFetcher {
    fn fetch(&self, repo: &RepoId) -> PipelineResult<PathBuf> {
        if repo.as_str() == self.failing {
            return Err(PipelineError::tool(
                "fetch",
                format!("package {}: unrecognized import path", repo),
            ));
        }
        Ok(self.checkout.clone())
    }
}

/// Analyzer giving every non-test `.go` file 10 statements (8 covered) and
/// one warning on `main.go`.
pub struct StubAnalyzer;

impl Analyzer for StubAnalyzer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>, tree: &mut FileTree) -> PipelineResult<Vec<Issue>> {
        let files: Vec<PathBuf> = tree.files().map(Path::to_path_buf).collect();
        for file in files {
            let name = file.to_string_lossy().to_string();
            if !name.ends_with(".go") || name.ends_with("_test.go") {
                continue;
            }
            if let Some(leaf) = tree.leaf_mut(&file) {
                *leaf = Metrics {
                    statements: 10,
                    covered_statements: 8,
                    coverage: 80.0,
                    ..Default::default()
                };
            }
        }

        let main = ctx.checkout.join("main.go");
        let mut issues = Vec::new();
        if let Some(leaf) = tree.leaf_mut(&main) {
            leaf.issues_no += 1;
            leaf.warnings_no += 1;
            issues.push(Issue {
                linter: "golint".into(),
                severity: IssueSeverity::Warning,
                path: "main.go".into(),
                line: 3,
                col: 1,
                message: "exported func main should have comment".into(),
            });
        }
        Ok(issues)
    }
}

pub fn pipeline(broker: &Arc<InMemoryBroker>, fetcher: Box<dyn RepoFetcher>) -> AnalysisPipeline {
    AnalysisPipeline::new(broker.clone(), Notifier::new(broker.clone(), EVENTS), fetcher)
        .with_analyzers(vec![Box::new(StubAnalyzer)])
}

pub fn local_pipeline(broker: &Arc<InMemoryBroker>, checkout: &Path) -> AnalysisPipeline {
    pipeline(broker, Box::new(ExistingCheckout::new(checkout)))
}
