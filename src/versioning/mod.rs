//! Build numbering and commit dedup
//!
//! The last entry of `builds:<repo>` is the previous build. A new build gets
//! the next number unless the commit is unchanged, in which case the job is
//! a re-submission and is skipped.
//!
//! Two workers handling the same repository at once would both read the
//! same history, so the chosen number is reserved with `SET NX` on
//! `claims:<repo>:<no>`. A loser moves on to the next free number. A job
//! that fails after reserving hands its number back with
//! [`BuildTracker::release`]; only a crashed worker leaves a gap.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::broker::KeyValueStore;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{RepoId, Report};

/// Outcome of planning a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPlan {
    /// Analyse and persist under this number
    Fresh { no: u64 },
    /// The commit was already analysed as build `no`
    AlreadyAnalyzed { no: u64 },
}

pub fn builds_key(repo: &RepoId) -> String {
    format!("builds:{}", repo)
}

pub fn claim_key(repo: &RepoId, no: u64) -> String {
    format!("claims:{}:{}", repo, no)
}

pub struct BuildTracker {
    store: Arc<dyn KeyValueStore>,
    check_last_commit: bool,
}

impl BuildTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            check_last_commit: true,
        }
    }

    /// Disable commit dedup; every job then gets a new build number.
    pub fn with_commit_check(mut self, enabled: bool) -> Self {
        self.check_last_commit = enabled;
        self
    }

    /// Most recent report for `repo`, `None` before the first build.
    pub fn last_build(&self, repo: &RepoId) -> PipelineResult<Option<Report>> {
        let key = builds_key(repo);
        let raw = self
            .store
            .list_last(&key)
            .map_err(|e| PipelineError::storage(format!("reading {}", key), e))?;

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| PipelineError::serialization(format!("last build in {}", key), e)),
        }
    }

    /// Decide the build number for `commit` and reserve it.
    pub fn plan(&self, repo: &RepoId, commit: &str) -> PipelineResult<BuildPlan> {
        let mut candidate = match self.last_build(repo)? {
            None => {
                debug!("No history for {}: first build", repo);
                1
            }
            Some(last) => {
                if self.check_last_commit && last.commit_hash == commit {
                    return Ok(BuildPlan::AlreadyAnalyzed { no: last.no });
                }
                last.no + 1
            }
        };

        loop {
            let key = claim_key(repo, candidate);
            let won = self
                .store
                .set_if_absent(&key, commit)
                .map_err(|e| PipelineError::storage(format!("reserving {}", key), e))?;
            if won {
                debug!("Reserved build {} for {}", candidate, repo);
                return Ok(BuildPlan::Fresh { no: candidate });
            }
            warn!(
                "Build number {} for {} already taken, trying {}",
                candidate,
                repo,
                candidate + 1
            );
            candidate += 1;
        }
    }

    /// Give back a reserved number whose build was never persisted.
    pub fn release(&self, repo: &RepoId, no: u64) -> PipelineResult<()> {
        let key = claim_key(repo, no);
        self.store
            .delete(&key)
            .map_err(|e| PipelineError::storage(format!("releasing {}", key), e))?;
        debug!("Released build {} for {}", no, repo);
        Ok(())
    }
}
