//! Repository analysis pipeline
//!
//! Orchestrates one job from download to notification:
//! 1. Fetch the repository and announce the download
//! 2. Mark the repository as belonging to its owner
//! 3. Resolve the checked-out commit
//! 4. Pick a build number, or stop if the commit was already analyzed
//! 5. Load `.qfarm.toml`
//! 6. Build the file tree
//! 7. Run the enabled analyzers
//! 8. Aggregate and score
//! 9. Persist nodes, issues and the report
//! 10. Announce completion
//!
//! Any step failing ends the job with its error; the consumer turns that
//! into an `error` event.

pub mod commit;
pub mod fetch;
pub mod persist;

pub use commit::{CommitResolver, GitCommitResolver};
pub use fetch::{CommandFetcher, ExistingCheckout, RepoFetcher};

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::analyzers::{default_analyzers, AnalysisContext, Analyzer};
use crate::broker::KeyValueStore;
use crate::config::{RepoConfig, WorkerConfig};
use crate::error::PipelineResult;
use crate::models::{human_duration, Build, EventType, Issue, RepoId, Report};
use crate::notify::{Notifier, ALL_DONE_MSG, ALREADY_ANALYZED_MSG};
use crate::scoring::{calculate_score, TechnicalDebt};
use crate::tree::FileTree;
use crate::versioning::{BuildPlan, BuildTracker};

/// How a job that didn't fail ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Report),
    /// The commit was already analyzed as build `no`; nothing was written
    AlreadyAnalyzed { no: u64 },
}

/// Full analysis pipeline for one repository at a time.
pub struct AnalysisPipeline {
    store: Arc<dyn KeyValueStore>,
    notifier: Notifier,
    fetcher: Box<dyn RepoFetcher>,
    resolver: Box<dyn CommitResolver>,
    analyzers: Vec<Box<dyn Analyzer>>,
    tracker: BuildTracker,
}

impl AnalysisPipeline {
    /// Pipeline with git commit resolution, commit dedup and no analyzers.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        notifier: Notifier,
        fetcher: Box<dyn RepoFetcher>,
    ) -> Self {
        Self {
            tracker: BuildTracker::new(store.clone()),
            store,
            notifier,
            fetcher,
            resolver: Box::new(GitCommitResolver),
            analyzers: Vec::new(),
        }
    }

    /// Production wiring: download command, lint and coverage adapters.
    pub fn from_config(
        config: &WorkerConfig,
        store: Arc<dyn KeyValueStore>,
        notifier: Notifier,
    ) -> Self {
        let fetcher = CommandFetcher::new(
            config.fetch_command.clone(),
            config.download_root.clone(),
            config.timeouts.fetch_secs,
        );
        Self::new(store, notifier, Box::new(fetcher))
            .with_analyzers(default_analyzers(&config.timeouts))
            .with_commit_check(config.check_last_commit_hash)
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn RepoFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_commit_resolver(mut self, resolver: Box<dyn CommitResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_analyzers(mut self, analyzers: Vec<Box<dyn Analyzer>>) -> Self {
        self.analyzers = analyzers;
        self
    }

    /// Disable commit dedup so every job produces a new build.
    pub fn with_commit_check(mut self, enabled: bool) -> Self {
        self.tracker = BuildTracker::new(self.store.clone()).with_commit_check(enabled);
        self
    }

    /// Run every step for `repo`, failing fast.
    pub fn run(&self, repo: &RepoId) -> PipelineResult<JobOutcome> {
        let started = Utc::now();
        let clock = Instant::now();

        let checkout = self.fetcher.fetch(repo)?;
        self.notifier.send_event(
            repo,
            &format!("Repo {} downloaded", repo),
            EventType::DownloadComplete,
        );

        persist::mark_user_repo(self.store.as_ref(), repo, started.timestamp() as f64)?;

        let commit_hash = self.resolver.head_commit(&checkout)?;

        let no = match self.tracker.plan(repo, &commit_hash)? {
            BuildPlan::Fresh { no } => no,
            BuildPlan::AlreadyAnalyzed { no } => {
                info!("{} at {} already analyzed as build {}", repo, commit_hash, no);
                self.notifier.send_event_with_payload(
                    repo,
                    ALREADY_ANALYZED_MSG,
                    EventType::AlreadyAnalyzed,
                    no.to_string(),
                );
                return Ok(JobOutcome::AlreadyAnalyzed { no });
            }
        };

        let result = self.analyze_and_persist(repo, no, commit_hash, started, &checkout, clock);
        match result {
            Ok(report) => {
                self.notifier.send_event_with_payload(
                    repo,
                    ALL_DONE_MSG,
                    EventType::AllDone,
                    no.to_string(),
                );
                Ok(JobOutcome::Completed(report))
            }
            Err(e) => {
                // The next job for this repo should get the same number
                if let Err(release) = self.tracker.release(repo, no) {
                    warn!("Build {} of {} stays reserved: {}", no, repo, release);
                }
                Err(e)
            }
        }
    }

    /// Steps after the build number is reserved: config, tree, analyzers,
    /// scoring and persistence.
    fn analyze_and_persist(
        &self,
        repo: &RepoId,
        no: u64,
        commit_hash: String,
        started: DateTime<Utc>,
        checkout: &Path,
        clock: Instant,
    ) -> PipelineResult<Report> {
        let build = Build {
            repo: repo.clone(),
            config: RepoConfig::load(repo, checkout)?,
            commit_hash,
            started,
            no,
        };
        info!("Analyzing {} build {} at {}", repo, no, build.commit_hash);

        let root = build.config.root_dir(checkout);
        let mut tree = FileTree::build(checkout, &root, &build.config.effective_excludes())?;

        let issues = self.run_analyzers(&build, checkout, &mut tree)?;

        tree.aggregate();
        let totals = tree.root_metrics()?;
        let debt = TechnicalDebt::from_metrics(&totals);

        let nodes = persist::store_nodes(self.store.as_ref(), repo, no, &tree)?;
        let files_with_issues = persist::store_issues(self.store.as_ref(), repo, no, &issues)?;
        debug!(
            "Persisted {} nodes and issues for {} files",
            nodes, files_with_issues
        );

        let report = Report {
            repo: repo.to_string(),
            no,
            score: calculate_score(&totals),
            time: build.started,
            took: human_duration(clock.elapsed()),
            commit_hash: build.commit_hash,
            config: build.config,
            coverage: totals.coverage,
            tests_no: totals.tests_no,
            passed_no: totals.passed_no,
            failed_no: totals.failed_no,
            issues_no: totals.issues_no,
            errors_no: totals.errors_no,
            warnings_no: totals.warnings_no,
            technical_debt_cost: debt.cost,
            technical_debt_time: debt.time_string(),
        };
        persist::store_report(self.store.as_ref(), repo, &report)?;

        info!(
            "Build {} of {} done in {}: score {}",
            no, repo, report.took, report.score
        );
        Ok(report)
    }

    fn run_analyzers(
        &self,
        build: &Build,
        checkout: &Path,
        tree: &mut FileTree,
    ) -> PipelineResult<Vec<Issue>> {
        let ctx = AnalysisContext {
            repo: &build.repo,
            checkout,
            config: &build.config,
        };

        let mut issues = Vec::new();
        for analyzer in &self.analyzers {
            if !analyzer.is_enabled(&build.config) {
                debug!("{} disabled for {}", analyzer.name(), build.repo);
                continue;
            }
            let step = Instant::now();
            issues.extend(analyzer.analyze(&ctx, tree)?);
            debug!(
                "{} finished in {}",
                analyzer.name(),
                human_duration(step.elapsed())
            );
        }
        Ok(issues)
    }
}
