//! `run` and `enqueue` against the shared Redis broker

use anyhow::{Context, Result};
use console::style;
use std::sync::Arc;
use tracing::info;

use qfarm::broker::{JobQueue, RedisBroker, SharedWorkList};
use qfarm::config::WorkerConfig;
use qfarm::models::RepoId;
use qfarm::notify::Notifier;
use qfarm::pipeline::AnalysisPipeline;
use qfarm::worker::{Worker, WorkerSettings};

fn connect(config: &WorkerConfig) -> Result<Arc<RedisBroker>> {
    let broker = RedisBroker::connect(
        &config.redis_url,
        config.redis_password.as_deref(),
        config.broker_timeout(),
    )
    .with_context(|| format!("Can't connect to broker at {}", config.redis_url))?;
    Ok(Arc::new(broker))
}

fn work_list(config: &WorkerConfig, broker: &Arc<RedisBroker>) -> SharedWorkList {
    SharedWorkList::new(
        broker.clone(),
        broker.clone(),
        config.queue.list.clone(),
        config.queue.channel.clone(),
    )
}

/// Start the consumer loop. Only returns if startup fails.
pub fn run(config: &WorkerConfig) -> Result<()> {
    let broker = connect(config)?;
    let signals = broker
        .subscribe(&config.queue.channel)
        .with_context(|| format!("Can't subscribe to {}", config.queue.channel))?;

    let notifier = Notifier::new(broker.clone(), config.events_channel.clone());
    let pipeline = AnalysisPipeline::from_config(config, broker.clone(), notifier.clone());
    let queue = Arc::new(work_list(config, &broker));

    info!(
        "Listening on {} for jobs in {}, downloads go to {}",
        config.queue.channel,
        config.queue.list,
        config.download_root.display()
    );

    let mut worker = Worker::new(
        queue,
        Box::new(signals),
        pipeline,
        notifier,
        WorkerSettings::from_config(config),
    );
    worker.run()
}

/// Validate every id first so a typo doesn't leave half the batch queued.
pub fn enqueue(config: &WorkerConfig, repos: &[String]) -> Result<()> {
    let ids = repos
        .iter()
        .map(|r| RepoId::parse(r))
        .collect::<Result<Vec<_>, _>>()?;

    let broker = connect(config)?;
    let queue = work_list(config, &broker);
    for id in &ids {
        queue
            .enqueue(id.as_str())
            .with_context(|| format!("Can't enqueue {}", id))?;
        println!("{} {}", style("Queued").green(), style(id).cyan());
    }
    Ok(())
}
