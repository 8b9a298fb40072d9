//! CLI entry point for the timeline soak harness.
//!
//! ```bash
//! timeline-soak --config timeline.toml run --duration-secs 30
//! timeline-soak show-config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_timeline::config::TimelineConfig;
use rust_timeline::soak::run_soak;
use rust_timeline::tracing_setup::{self, TracingConfig};
use rust_timeline::BufferManager;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "timeline-soak")]
#[command(
    about = "Exercise a frame timeline with a timed producer and consumer",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to ./timeline.toml when present)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the soak and print statistics as JSON
    Run {
        /// Override soak.duration_secs
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Print the effective configuration as JSON
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TimelineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    config.validate()?;

    match cli.command {
        Commands::Run { duration_secs } => {
            tracing_setup::init(&TracingConfig::from_config(&config)?)?;
            let manager = BufferManager::with_config(config.manager_config()?);
            let duration = Duration::from_secs(duration_secs.unwrap_or(config.soak.duration_secs));

            let report = run_soak(&config, manager, duration).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
