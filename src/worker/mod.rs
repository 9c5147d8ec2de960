//! Job queue consumer
//!
//! Waits for a "work available" signal, then drains the shared work list
//! one item at a time. Several workers may wait on the same list; whoever
//! pops an item owns it. The wait is bounded by the poll interval so a
//! signal published while this worker was busy is not lost, and a broken
//! subscription degrades to plain polling.
//!
//! A failed job produces exactly one `error` event and is dropped. There is
//! no redelivery: a crash between claim and completion loses the job.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::broker::{Job, JobQueue, SignalSource};
use crate::config::WorkerConfig;
use crate::error::{PipelineResult, StoreResult};
use crate::models::RepoId;
use crate::notify::Notifier;
use crate::pipeline::{AnalysisPipeline, JobOutcome};

/// Consumer loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Longest wait for a signal before checking the list anyway
    pub poll_interval: Duration,
    /// Pause after a broker error before trying again
    pub retry_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(2),
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            ..Self::default()
        }
    }
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    signals: Box<dyn SignalSource>,
    pipeline: AnalysisPipeline,
    notifier: Notifier,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        signals: Box<dyn SignalSource>,
        pipeline: AnalysisPipeline,
        notifier: Notifier,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            signals,
            pipeline,
            notifier,
            settings,
        }
    }

    /// Consume forever. Broker errors are logged and retried.
    pub fn run(&mut self) -> ! {
        info!(
            "Worker started, polling every {}s",
            self.settings.poll_interval.as_secs_f64()
        );
        loop {
            match self.tick() {
                Ok(0) => {}
                Ok(n) => info!("Processed {} jobs, waiting for more", n),
                Err(e) => {
                    warn!("Broker error, retrying: {}", e);
                    thread::sleep(self.settings.retry_backoff);
                }
            }
        }
    }

    /// Wait for one signal (or the poll interval), then drain the list.
    ///
    /// Returns how many jobs were processed.
    pub fn tick(&mut self) -> StoreResult<usize> {
        match self.signals.wait(self.settings.poll_interval) {
            Ok(true) => debug!("Work signalled"),
            Ok(false) => {}
            Err(e) => {
                warn!("Signal source failed, polling instead: {}", e);
                thread::sleep(self.settings.poll_interval);
            }
        }
        self.drain()
    }

    /// Claim and process items until the list is empty.
    pub fn drain(&self) -> StoreResult<usize> {
        let mut processed = 0;
        while let Some(job) = self.queue.claim()? {
            // Outcome already reported through events and logs
            let _ = self.process(&job);
            processed += 1;
        }
        Ok(processed)
    }

    /// Run the pipeline for one claimed item and mark it complete.
    pub fn process(&self, job: &Job) -> PipelineResult<JobOutcome> {
        debug!("Job {} claimed: {}", job.id, job.payload);

        let result = RepoId::parse(&job.payload).and_then(|repo| self.pipeline.run(&repo));
        match &result {
            Ok(JobOutcome::Completed(report)) => {
                info!("{} build {} scored {}", report.repo, report.no, report.score)
            }
            Ok(JobOutcome::AlreadyAnalyzed { no }) => {
                info!("{} unchanged since build {}", job.payload, no)
            }
            Err(e) => {
                error!("Analysis of {} failed: {}", job.payload, e);
                self.notifier.send_error(&job.payload, &e.to_string());
            }
        }

        if let Err(e) = self.queue.complete(job) {
            warn!("Can't mark job {} complete: {}", job.id, e);
        }
        result
    }
}
