//! Storage layout for build results
//!
//! | key                                | value            |
//! |------------------------------------|------------------|
//! | `files:<repo>:<no>:<path>`         | Node JSON        |
//! | `issues:<repo>:<no>:<path>`        | Issue list JSON  |
//! | `all-builds`, `builds:<repo>`      | Report JSON list |
//! | `reports:<repo>:<no>`              | Report JSON      |
//! | `users:<user>:repos`               | sorted set       |
//!
//! Writes are independent: a failure stops the sequence and names the key,
//! but nothing already written is undone.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::broker::KeyValueStore;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Issue, RepoId, Report};
use crate::tree::FileTree;
use crate::versioning::builds_key;

pub const ALL_BUILDS_KEY: &str = "all-builds";

pub fn files_key(repo: &RepoId, no: u64, key_path: &str) -> String {
    format!("files:{}:{}:{}", repo, no, key_path)
}

pub fn issues_key(repo: &RepoId, no: u64, path: &str) -> String {
    format!("issues:{}:{}:{}", repo, no, path)
}

pub fn reports_key(repo: &RepoId, no: u64) -> String {
    format!("reports:{}:{}", repo, no)
}

pub fn user_repos_key(user: &str) -> String {
    format!("users:{}:repos", user)
}

fn to_json<T: Serialize + ?Sized>(value: &T, key: &str) -> PipelineResult<String> {
    serde_json::to_string(value).map_err(|e| PipelineError::serialization(key, e))
}

fn set(store: &dyn KeyValueStore, key: &str, value: &str) -> PipelineResult<()> {
    store
        .set(key, value)
        .map_err(|e| PipelineError::storage(format!("setting {}", key), e))
}

fn push(store: &dyn KeyValueStore, key: &str, value: &str) -> PipelineResult<()> {
    store
        .list_push(key, value)
        .map_err(|e| PipelineError::storage(format!("pushing to {}", key), e))
}

/// Record that the repository's owner has submitted it. Re-marking keeps the
/// first timestamp.
pub fn mark_user_repo(store: &dyn KeyValueStore, repo: &RepoId, at: f64) -> PipelineResult<()> {
    let key = user_repos_key(repo.user());
    store
        .sorted_set_add(&key, repo.as_str(), at)
        .map_err(|e| PipelineError::storage(format!("adding to {}", key), e))
}

/// Every node of the tree under its checkout-relative key.
pub fn store_nodes(
    store: &dyn KeyValueStore,
    repo: &RepoId,
    no: u64,
    tree: &FileTree,
) -> PipelineResult<usize> {
    let nodes = tree.persisted_nodes()?;
    for (key_path, node) in &nodes {
        let key = files_key(repo, no, key_path);
        set(store, &key, &to_json(node, &key)?)?;
    }
    debug!("Stored {} nodes for {} #{}", nodes.len(), repo, no);
    Ok(nodes.len())
}

/// Issue lists grouped per file.
pub fn store_issues(
    store: &dyn KeyValueStore,
    repo: &RepoId,
    no: u64,
    issues: &[Issue],
) -> PipelineResult<usize> {
    let mut by_file: BTreeMap<&str, Vec<&Issue>> = BTreeMap::new();
    for issue in issues {
        by_file.entry(issue.path.as_str()).or_default().push(issue);
    }
    for (path, file_issues) in &by_file {
        let key = issues_key(repo, no, path);
        set(store, &key, &to_json(file_issues, &key)?)?;
    }
    Ok(by_file.len())
}

/// Append the report to both histories and store it for direct lookup.
pub fn store_report(store: &dyn KeyValueStore, repo: &RepoId, report: &Report) -> PipelineResult<()> {
    let key = reports_key(repo, report.no);
    let json = to_json(report, &key)?;
    push(store, ALL_BUILDS_KEY, &json)?;
    push(store, &builds_key(repo), &json)?;
    set(store, &key, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::models::IssueSeverity;
    use std::path::PathBuf;

    fn repo() -> RepoId {
        RepoId::parse("host/u/r").unwrap()
    }

    fn issue(path: &str, line: u32) -> Issue {
        Issue {
            linter: "vet".into(),
            severity: IssueSeverity::Warning,
            path: path.into(),
            line,
            col: 1,
            message: "m".into(),
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(files_key(&repo(), 3, "/"), "files:host/u/r:3:/");
        assert_eq!(files_key(&repo(), 3, "pkg/a.go"), "files:host/u/r:3:pkg/a.go");
        assert_eq!(reports_key(&repo(), 3), "reports:host/u/r:3");
        assert_eq!(user_repos_key("u"), "users:u:repos");
    }

    #[test]
    fn test_store_nodes() {
        let broker = InMemoryBroker::new();
        let checkout = PathBuf::from("/srv/src/host/u/r");
        let mut tree = FileTree::new(&checkout, &checkout);
        tree.insert(&checkout.join("pkg/a.go"), false);
        tree.aggregate();

        assert_eq!(store_nodes(&broker, &repo(), 1, &tree).unwrap(), 3);
        assert_eq!(
            broker.keys_with_prefix("files:host/u/r:1:"),
            vec![
                "files:host/u/r:1:/",
                "files:host/u/r:1:pkg/",
                "files:host/u/r:1:pkg/a.go"
            ]
        );
    }

    #[test]
    fn test_store_issues_groups_by_file() {
        let broker = InMemoryBroker::new();
        let issues = vec![issue("a.go", 1), issue("pkg/b.go", 2), issue("a.go", 7)];
        assert_eq!(store_issues(&broker, &repo(), 2, &issues).unwrap(), 2);

        let raw = broker.get("issues:host/u/r:2:a.go").unwrap().unwrap();
        let stored: Vec<Issue> = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].line, 7);
    }

    #[test]
    fn test_mark_user_repo_idempotent() {
        let broker = InMemoryBroker::new();
        mark_user_repo(&broker, &repo(), 1.0).unwrap();
        mark_user_repo(&broker, &repo(), 2.0).unwrap();
        assert_eq!(broker.sorted_set_members("users:u:repos"), vec!["host/u/r"]);
    }
}
