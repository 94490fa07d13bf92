//! # isp3a CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - Configuration loading and validation
//! - A simulated sensor driving the engine end to end
//! - Graceful shutdown handling

mod cli;
mod commands;
mod simulation;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_simulation, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    // the run command installs its own Prometheus exporter once the config is loaded
    observability::init_with_config(observability_config(&cli))?;

    info!(version = env!("CARGO_PKG_VERSION"), "isp3a CLI starting");

    let result = match &cli.command {
        Commands::Run(args) => run_simulation(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

fn observability_config(cli: &Cli) -> ObservabilityConfig {
    ObservabilityConfig {
        log_format: cli.log_format.clone().into(),
        ..ObservabilityConfig::default()
    }
    .with_verbosity(cli.verbose, cli.quiet)
}
