//! CLI command definitions and handlers

mod analyze;
mod worker;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use qfarm::config::WorkerConfig;

/// qfarm-worker - repository quality analysis worker
#[derive(Parser, Debug)]
#[command(name = "qfarm-worker")]
#[command(
    version,
    about = "Analyze repositories from a shared work list and store versioned quality reports",
    after_help = "\
Examples:
  qfarm-worker run                                   Consume jobs until killed
  qfarm-worker enqueue github.com/user/repo          Queue a repository for analysis
  qfarm-worker analyze github.com/user/repo          Fetch and analyze once, locally
  qfarm-worker analyze github.com/user/repo --path . --json
                                                     Analyze an existing checkout"
)]
pub struct Cli {
    /// Worker config file (default: <config dir>/qfarm/worker.toml)
    #[arg(long, global = true, env = "QFARM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume jobs from the shared work list until killed
    Run,

    /// Push repositories onto the work list and wake waiting workers
    Enqueue {
        /// Repository identifiers (host/user/repo)
        #[arg(required = true)]
        repos: Vec<String>,
    },

    /// Analyze one repository once without a broker and print the report
    Analyze {
        /// Repository identifier (host/user/repo)
        repo: String,

        /// Use this checkout instead of downloading
        #[arg(long)]
        path: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Run the CLI
pub fn run(cli: Cli) -> Result<()> {
    let config = WorkerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => worker::run(&config),
        Commands::Enqueue { repos } => worker::enqueue(&config, &repos),
        Commands::Analyze { repo, path, json } => {
            analyze::run(&config, &repo, path.as_deref(), json)
        }
    }
}
