//! Repository download

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::analyzers::external_tool::{expand_command, run_external_tool};
use crate::error::{PipelineError, PipelineResult};
use crate::models::RepoId;

const TOOL_NAME: &str = "fetch";

/// Materializes a repository on disk and returns its checkout directory.
pub trait RepoFetcher: Send + Sync {
    fn fetch(&self, repo: &RepoId) -> PipelineResult<PathBuf>;
}

/// Runs a download command such as `go get -u -t {repo}/...`; the checkout
/// is expected at `<download root>/<repo>` afterwards.
pub struct CommandFetcher {
    command: Vec<String>,
    download_root: PathBuf,
    timeout_secs: u64,
}

impl CommandFetcher {
    pub fn new(command: Vec<String>, download_root: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            command,
            download_root: download_root.into(),
            timeout_secs,
        }
    }

    /// `GOPATH` for a download root of the form `<gopath>/src`.
    fn gopath(&self) -> Option<HashMap<String, String>> {
        if self.download_root.file_name()? != "src" {
            return None;
        }
        let gopath = self.download_root.parent()?;
        let mut env = HashMap::new();
        env.insert("GOPATH".to_string(), gopath.to_string_lossy().into_owned());
        Some(env)
    }
}

impl RepoFetcher for CommandFetcher {
    fn fetch(&self, repo: &RepoId) -> PipelineResult<PathBuf> {
        let cmd = expand_command(&self.command, &[("repo", repo.as_str())]);
        info!("Downloading {}", repo);

        let env = self.gopath();
        let result = run_external_tool(&cmd, TOOL_NAME, self.timeout_secs, None, env.as_ref())
            .into_result(TOOL_NAME, self.timeout_secs)?;
        if !result.exit_ok() {
            return Err(PipelineError::tool(TOOL_NAME, result.failure_text()));
        }

        let checkout = self.download_root.join(repo.as_str());
        if !checkout.is_dir() {
            return Err(PipelineError::tool(
                TOOL_NAME,
                format!("no checkout at {} after download", checkout.display()),
            ));
        }
        debug!("{} checked out at {}", repo, checkout.display());
        Ok(checkout)
    }
}

/// Uses a directory that is already on disk; nothing is downloaded.
pub struct ExistingCheckout {
    path: PathBuf,
}

impl ExistingCheckout {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RepoFetcher for ExistingCheckout {
    fn fetch(&self, repo: &RepoId) -> PipelineResult<PathBuf> {
        if !self.path.is_dir() {
            return Err(PipelineError::tool(
                TOOL_NAME,
                format!("{} is not a directory", self.path.display()),
            ));
        }
        debug!("Using existing checkout {} for {}", self.path.display(), repo);
        Ok(self.path.clone())
    }
}
