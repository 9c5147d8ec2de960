//! Commit resolution using libgit2
//!
//! Reads `HEAD` of the fetched checkout. This is a read of local files, so
//! unlike the external steps it runs without a time budget.

use git2::Repository;
use std::path::Path;
use tracing::debug;

use crate::error::PipelineResult;

/// Resolves the commit a checkout is at.
pub trait CommitResolver: Send + Sync {
    fn head_commit(&self, checkout: &Path) -> PipelineResult<String>;
}

/// [`CommitResolver`] backed by git2.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCommitResolver;

impl CommitResolver for GitCommitResolver {
    fn head_commit(&self, checkout: &Path) -> PipelineResult<String> {
        let repo = Repository::discover(checkout)?;
        let commit = repo.head()?.peel_to_commit()?;
        let hash = commit.id().to_string();
        debug!("{} is at {}", checkout.display(), hash);
        Ok(hash)
    }
}
