//! One-shot local analysis
//!
//! Runs the full pipeline once against an in-memory broker, so nothing is
//! shared with other workers and the build is always number 1.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;

use qfarm::broker::InMemoryBroker;
use qfarm::config::WorkerConfig;
use qfarm::models::{Event, Report, RepoId};
use qfarm::notify::Notifier;
use qfarm::pipeline::{AnalysisPipeline, ExistingCheckout, JobOutcome};

pub fn run(config: &WorkerConfig, repo: &str, path: Option<&Path>, json: bool) -> Result<()> {
    let repo = RepoId::parse(repo)?;

    let broker = Arc::new(InMemoryBroker::new());
    let events = broker.subscribe_raw(&config.events_channel);
    let notifier = Notifier::new(broker.clone(), config.events_channel.clone());

    let mut pipeline = AnalysisPipeline::from_config(config, broker.clone(), notifier);
    if let Some(path) = path {
        pipeline = pipeline.with_fetcher(Box::new(ExistingCheckout::new(path)));
    }

    let outcome = pipeline
        .run(&repo)
        .with_context(|| format!("Analysis of {} failed", repo))?;

    if !json {
        for raw in events.try_iter() {
            if let Ok(event) = serde_json::from_str::<Event>(&raw) {
                println!("  {} {}", style(format!("[{}]", event.kind)).dim(), event.msg);
            }
        }
    }

    match outcome {
        JobOutcome::Completed(report) if json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        JobOutcome::Completed(report) => print_report(&report),
        JobOutcome::AlreadyAnalyzed { no } => {
            println!("{} already analyzed as build {}", repo, no);
        }
    }
    Ok(())
}

fn print_report(report: &Report) {
    let score = match report.score {
        80..=100 => style(report.score).green().bold(),
        50..=79 => style(report.score).yellow().bold(),
        _ => style(report.score).red().bold(),
    };

    println!();
    println!(
        "{} {} #{}",
        style("Report").bold(),
        style(&report.repo).cyan(),
        report.no
    );
    println!("  Commit:    {}", style(&report.commit_hash).dim());
    println!("  Score:     {}/100", score);
    println!("  Coverage:  {:.1}%", report.coverage);
    println!(
        "  Tests:     {} ({} passed, {} failed)",
        report.tests_no, report.passed_no, report.failed_no
    );
    println!(
        "  Issues:    {} ({} errors, {} warnings)",
        report.issues_no, report.errors_no, report.warnings_no
    );
    println!(
        "  Debt:      {} points, {}",
        report.technical_debt_cost, report.technical_debt_time
    );
    println!("  Took:      {}", report.took);
}
