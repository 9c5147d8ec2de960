//! File tree model
//!
//! Builds one entry per file and directory of a checkout, lets analyzers
//! annotate leaves, then rolls leaf metrics up to every ancestor.
//!
//! # Aggregation rule
//!
//! ```text
//! dir.count    = Σ child.count          (statements, covered statements,
//!                                        tests, passed, failed, issues,
//!                                        errors, warnings)
//! dir.coverage = covered / statements × 100, or 0.0 with no statements
//! ```
//!
//! Sums commute, so the result does not depend on sibling order. Entries
//! are keyed by path in a `BTreeMap`; every descendant of a directory sorts
//! after it, so walking the map in reverse visits children before parents
//! and one pass suffices.

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::models::{Metrics, Node};

/// One file or directory in the tree index.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: PathBuf,
    pub parent: Option<PathBuf>,
    pub dir: bool,
    /// Immediate children, sorted by path
    pub children: Vec<PathBuf>,
    pub metrics: Metrics,
}

/// Tree index for one build.
#[derive(Debug, Clone)]
pub struct FileTree {
    checkout: PathBuf,
    root: PathBuf,
    entries: BTreeMap<PathBuf, TreeEntry>,
}

impl FileTree {
    /// Tree with only the root directory.
    ///
    /// `root` must be `checkout` or a directory below it.
    pub fn new(checkout: &Path, root: &Path) -> Self {
        let parent = if root == checkout {
            None
        } else {
            root.parent().map(Path::to_path_buf)
        };

        let mut entries = BTreeMap::new();
        entries.insert(
            root.to_path_buf(),
            TreeEntry {
                path: root.to_path_buf(),
                parent,
                dir: true,
                children: Vec::new(),
                metrics: Metrics::default(),
            },
        );

        Self {
            checkout: checkout.to_path_buf(),
            root: root.to_path_buf(),
            entries,
        }
    }

    /// Walk `root` and create an entry per file and directory.
    ///
    /// Honours `.gitignore`, skips hidden entries (`.git`, `.qfarm`) and
    /// drops anything matching one of `excludes` (globs relative to `root`).
    pub fn build(checkout: &Path, root: &Path, excludes: &[String]) -> PipelineResult<Self> {
        if !root.is_dir() {
            return Err(PipelineError::MissingRoot(root.display().to_string()));
        }

        let mut overrides = OverrideBuilder::new(root);
        for pattern in excludes {
            // `dir/**` also drops `dir` itself
            let dir = pattern.strip_suffix("/**").filter(|d| !d.is_empty());
            for glob in std::iter::once(pattern.as_str()).chain(dir) {
                overrides.add(&format!("!{}", glob)).map_err(|e| {
                    PipelineError::Config(format!("invalid exclude pattern {:?}: {}", pattern, e))
                })?;
            }
        }
        let overrides = overrides
            .build()
            .map_err(|e| PipelineError::Config(format!("invalid exclude patterns: {}", e)))?;

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .overrides(overrides)
            .build();

        let mut tree = Self::new(checkout, root);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            tree.insert(entry.path(), dir);
        }

        debug!(
            "Built tree for {}: {} entries",
            root.display(),
            tree.entries.len()
        );
        Ok(tree)
    }

    /// Insert a path, creating missing ancestor directories up to the root.
    /// Paths outside the root are ignored.
    pub fn insert(&mut self, path: &Path, dir: bool) {
        if !path.starts_with(&self.root) || path == self.root {
            return;
        }
        if self.entries.contains_key(path) {
            return;
        }

        let parent = path.parent().map(Path::to_path_buf);
        if let Some(parent) = &parent {
            if !self.entries.contains_key(parent) {
                self.insert(parent, true);
            }
            if let Some(p) = self.entries.get_mut(parent) {
                let at = p.children.partition_point(|c| c.as_path() < path);
                p.children.insert(at, path.to_path_buf());
            }
        }

        self.entries.insert(
            path.to_path_buf(),
            TreeEntry {
                path: path.to_path_buf(),
                parent,
                dir,
                children: Vec::new(),
                metrics: Metrics::default(),
            },
        );
    }

    pub fn checkout(&self) -> &Path {
        &self.checkout
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&TreeEntry> {
        self.entries.get(path)
    }

    /// All file (leaf) paths, sorted.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .values()
            .filter(|e| !e.dir)
            .map(|e| e.path.as_path())
    }

    /// Mutable metrics of a file. Directories are derived and not exposed.
    pub fn leaf_mut(&mut self, path: &Path) -> Option<&mut Metrics> {
        self.entries
            .get_mut(path)
            .filter(|e| !e.dir)
            .map(|e| &mut e.metrics)
    }

    /// Like [`leaf_mut`](Self::leaf_mut) for a path relative to the checkout
    /// as reported by external tools (`./pkg/a.go`, `pkg/a.go`).
    pub fn leaf_for_relative(&mut self, rel: &str) -> Option<&mut Metrics> {
        let path = self.resolve_relative(rel)?;
        self.leaf_mut(&path)
    }

    /// Absolute path for a tool-reported relative path, if it stays inside
    /// the checkout.
    pub fn resolve_relative(&self, rel: &str) -> Option<PathBuf> {
        let rel = Path::new(rel);
        if rel.is_absolute() {
            return rel.starts_with(&self.checkout).then(|| rel.to_path_buf());
        }
        let mut path = self.checkout.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(path)
    }

    /// Roll leaf metrics up to every directory in one bottom-up pass.
    pub fn aggregate(&mut self) {
        let dirs: Vec<PathBuf> = self
            .entries
            .iter()
            .rev()
            .filter(|(_, e)| e.dir)
            .map(|(p, _)| p.clone())
            .collect();

        for dir in dirs {
            let total = match self.entries.get(&dir) {
                Some(entry) => aggregate_children(
                    entry
                        .children
                        .iter()
                        .filter_map(|c| self.entries.get(c))
                        .map(|c| &c.metrics),
                ),
                None => continue,
            };
            if let Some(entry) = self.entries.get_mut(&dir) {
                entry.metrics = total;
            }
        }
    }

    /// Aggregated metrics of the root node.
    pub fn root_metrics(&self) -> PipelineResult<Metrics> {
        self.entries
            .get(&self.root)
            .map(|e| e.metrics)
            .ok_or_else(|| PipelineError::MissingRoot(self.root.display().to_string()))
    }

    /// Checkout-relative, `/`-separated form of `path`.
    ///
    /// Fails for anything outside the checkout; never returns an absolute
    /// path.
    pub fn relative(&self, path: &Path) -> PipelineResult<String> {
        let rel = path
            .strip_prefix(&self.checkout)
            .map_err(|_| PipelineError::PathOutsideCheckout {
                path: path.display().to_string(),
                root: self.checkout.display().to_string(),
            })?;

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(PipelineError::PathOutsideCheckout {
                        path: path.display().to_string(),
                        root: self.checkout.display().to_string(),
                    })
                }
            }
        }
        Ok(parts.join("/"))
    }

    /// Persistable nodes as `(key path, node)` pairs.
    ///
    /// Key paths are checkout-relative with a trailing `/` on directories
    /// (`/` alone for a checkout-level root). Each node carries its immediate
    /// children one level deep.
    pub fn persisted_nodes(&self) -> PipelineResult<Vec<(String, Node)>> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            let mut node = self.shallow_node(entry)?;
            for child in &entry.children {
                if let Some(child) = self.entries.get(child) {
                    node.nodes.push(self.shallow_node(child)?);
                }
            }
            out.push((key_path(&node.path, entry.dir), node));
        }
        Ok(out)
    }

    fn shallow_node(&self, entry: &TreeEntry) -> PipelineResult<Node> {
        let parent_path = match &entry.parent {
            Some(parent) => self.relative(parent)?,
            None => String::new(),
        };
        Ok(Node {
            path: self.relative(&entry.path)?,
            parent_path,
            dir: entry.dir,
            nodes: Vec::new(),
            metrics: entry.metrics,
        })
    }
}

/// Aggregate one directory from its children's metrics.
pub fn aggregate_children<'a>(children: impl IntoIterator<Item = &'a Metrics>) -> Metrics {
    let mut total = Metrics::default();
    for child in children {
        total.absorb(child);
    }
    total.coverage = total.weighted_coverage();
    total
}

/// Storage key suffix for a node path.
pub fn key_path(rel: &str, dir: bool) -> String {
    if !dir {
        rel.to_string()
    } else if rel.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(statements: u64, covered: u64, errors: u64, warnings: u64) -> Metrics {
        Metrics {
            coverage: if statements == 0 {
                0.0
            } else {
                covered as f64 * 100.0 / statements as f64
            },
            statements,
            covered_statements: covered,
            issues_no: errors + warnings,
            errors_no: errors,
            warnings_no: warnings,
            tests_no: 1,
            passed_no: 1,
            failed_no: 0,
        }
    }

    fn sample_tree(checkout: &Path, order: &[&str]) -> FileTree {
        let mut tree = FileTree::new(checkout, checkout);
        for rel in order {
            tree.insert(&checkout.join(rel), false);
        }
        let values = [
            ("a.go", leaf(10, 5, 1, 0)),
            ("pkg/b.go", leaf(30, 30, 0, 4)),
            ("pkg/sub/c.go", leaf(0, 0, 2, 2)),
            ("pkg/sub/d.go", leaf(60, 15, 0, 1)),
        ];
        for (rel, m) in values {
            *tree.leaf_mut(&checkout.join(rel)).unwrap() = m;
        }
        tree.aggregate();
        tree
    }

    #[test]
    fn test_aggregation_rule() {
        let checkout = PathBuf::from("/srv/src/host/u/r");
        let tree = sample_tree(
            &checkout,
            &["a.go", "pkg/b.go", "pkg/sub/c.go", "pkg/sub/d.go"],
        );

        let sub = tree.get(&checkout.join("pkg/sub")).unwrap().metrics;
        assert_eq!(sub.statements, 60);
        assert_eq!(sub.covered_statements, 15);
        assert!((sub.coverage - 25.0).abs() < 1e-9);
        assert_eq!(sub.errors_no, 2);
        assert_eq!(sub.warnings_no, 3);

        let root = tree.root_metrics().unwrap();
        assert_eq!(root.statements, 100);
        assert_eq!(root.covered_statements, 50);
        assert!((root.coverage - 50.0).abs() < 1e-9);
        assert_eq!(root.issues_no, 10);
        assert_eq!(root.errors_no, 3);
        assert_eq!(root.warnings_no, 7);
        assert_eq!(root.tests_no, 4);
        assert_eq!(root.passed_no, 4);
    }

    #[test]
    fn test_aggregation_order_independent() {
        let checkout = PathBuf::from("/srv/src/host/u/r");
        let forward = sample_tree(
            &checkout,
            &["a.go", "pkg/b.go", "pkg/sub/c.go", "pkg/sub/d.go"],
        );
        let backward = sample_tree(
            &checkout,
            &["pkg/sub/d.go", "pkg/sub/c.go", "pkg/b.go", "a.go"],
        );
        assert_eq!(
            forward.root_metrics().unwrap(),
            backward.root_metrics().unwrap()
        );

        let a = leaf(3, 1, 1, 2);
        let b = leaf(7, 7, 0, 0);
        let c = leaf(0, 0, 5, 5);
        assert_eq!(
            aggregate_children([&a, &b, &c]),
            aggregate_children([&c, &a, &b])
        );
    }

    #[test]
    fn test_empty_directory_has_zero_coverage() {
        let checkout = PathBuf::from("/srv/src/host/u/r");
        let mut tree = FileTree::new(&checkout, &checkout);
        tree.insert(&checkout.join("empty"), true);
        tree.aggregate();

        let empty = tree.get(&checkout.join("empty")).unwrap().metrics;
        assert_eq!(empty, Metrics::default());
        assert_eq!(tree.root_metrics().unwrap().coverage, 0.0);
    }

    #[test]
    fn test_leaf_mut_rejects_directories() {
        let checkout = PathBuf::from("/srv/src/host/u/r");
        let mut tree = FileTree::new(&checkout, &checkout);
        tree.insert(&checkout.join("pkg/a.go"), false);
        assert!(tree.leaf_mut(&checkout.join("pkg")).is_none());
        assert!(tree.leaf_for_relative("./pkg/a.go").is_some());
        assert!(tree.leaf_for_relative("../escape.go").is_none());
    }

    #[test]
    fn test_persisted_nodes_are_relative() {
        let checkout = PathBuf::from("/srv/src/host/u/r");
        let tree = sample_tree(
            &checkout,
            &["a.go", "pkg/b.go", "pkg/sub/c.go", "pkg/sub/d.go"],
        );
        let nodes = tree.persisted_nodes().unwrap();

        let keys: Vec<&str> = nodes.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"/"));
        assert!(keys.contains(&"pkg/"));
        assert!(keys.contains(&"pkg/sub/"));
        assert!(keys.contains(&"pkg/sub/d.go"));

        for (_, node) in &nodes {
            assert!(!node.path.starts_with('/'));
            assert!(!node.path.contains("/srv/src"));
            assert!(!node.parent_path.contains("/srv/src"));
            for child in &node.nodes {
                assert!(!child.path.contains("/srv/src"));
                assert!(child.nodes.is_empty());
            }
        }

        let (_, pkg) = nodes.iter().find(|(k, _)| k == "pkg/").unwrap();
        assert_eq!(pkg.parent_path, "");
        let child_paths: Vec<&str> = pkg.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(child_paths, vec!["pkg/b.go", "pkg/sub"]);
    }

    #[test]
    fn test_relative_rejects_outside_paths() {
        let checkout = PathBuf::from("/srv/src/host/u/r");
        let tree = FileTree::new(&checkout, &checkout);
        assert!(matches!(
            tree.relative(Path::new("/tmp/other.go")),
            Err(PipelineError::PathOutsideCheckout { .. })
        ));
    }

    #[test]
    fn test_subdirectory_root() {
        let checkout = PathBuf::from("/srv/src/host/u/r");
        let root = checkout.join("src");
        let mut tree = FileTree::new(&checkout, &root);
        tree.insert(&root.join("main.go"), false);
        let nodes = tree.persisted_nodes().unwrap();
        let (key, node) = nodes.iter().find(|(_, n)| n.dir).unwrap();
        assert_eq!(key, "src/");
        assert_eq!(node.path, "src");
        assert_eq!(node.parent_path, "");
    }

    #[test]
    fn test_build_walks_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("pkg/inner")).unwrap();
        std::fs::create_dir_all(root.join("vendor/dep")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("main.go"), "package main\n").unwrap();
        std::fs::write(root.join("pkg/inner/x.go"), "package inner\n").unwrap();
        std::fs::write(root.join("vendor/dep/y.go"), "package dep\n").unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();

        let excludes = vec!["vendor/**".to_string()];
        let tree = FileTree::build(root, root, &excludes).unwrap();

        let files: Vec<String> = tree
            .files()
            .map(|p| tree.relative(p).unwrap())
            .collect();
        assert_eq!(files, vec!["main.go", "pkg/inner/x.go"]);
        assert!(tree.get(&root.join("pkg/inner")).unwrap().dir);
        assert!(tree.get(&root.join("vendor")).is_none());
    }

    #[test]
    fn test_build_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            FileTree::build(dir.path(), &missing, &[]),
            Err(PipelineError::MissingRoot(_))
        ));
    }

    #[test]
    fn test_key_path() {
        assert_eq!(key_path("", true), "/");
        assert_eq!(key_path("pkg", true), "pkg/");
        assert_eq!(key_path("pkg/a.go", false), "pkg/a.go");
    }
}
