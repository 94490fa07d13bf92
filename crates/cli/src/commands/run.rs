//! `run` command implementation.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::simulation::{Simulation, SimulationConfig};

/// Execute the `run` command
pub async fn run_simulation(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if let Some(mode) = args.working_mode {
        info!(?mode, "Overriding working mode from CLI");
        blueprint.engine.working_mode = mode.into();
    }

    info!(
        sensor = %blueprint.sensor.name,
        width = blueprint.sensor.width,
        height = blueprint.sensor.height,
        working_mode = ?blueprint.engine.working_mode,
        algo_mode = ?blueprint.engine.algo_mode,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let simulation = Simulation::new(SimulationConfig {
        blueprint,
        frames: args.frames,
        fps: args.fps,
        brightness: args.scene_brightness,
        noise: args.noise,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
    });

    let shutdown_signal = setup_shutdown_signal();

    tokio::select! {
        result = simulation.run() => {
            let stats = result.context("Simulation failed")?;
            info!(
                frames = stats.frames,
                passes = stats.passes,
                dropped = stats.engine.dropped,
                "Simulation completed successfully"
            );
            stats.print_summary();
        }
        _ = shutdown_signal => {
            warn!("Received shutdown signal, stopping simulation...");
        }
    }

    info!("isp3a finished");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &contracts::EngineBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Sensor:");
    println!("  Name: {}", blueprint.sensor.name);
    println!(
        "  Output: {}x{} {:?}",
        blueprint.sensor.width, blueprint.sensor.height, blueprint.sensor.pixel_format
    );
    println!("\nEngine:");
    println!("  Working mode: {:?}", blueprint.engine.working_mode);
    println!("  Algorithm mode: {:?}", blueprint.engine.algo_mode);
    println!(
        "  Pools: params={} stats={} cache={}",
        blueprint.engine.params_pool_size,
        blueprint.engine.stats_pool_size,
        blueprint.engine.stats_cache_size
    );
    let delays = &blueprint.exposure;
    println!(
        "\nExposure delays: time={} gain={} dcg={}",
        delays.time_delay, delays.gain_delay, delays.dcg_delay
    );
    println!("Aux light: {:?}", blueprint.aux_light.mode);
    println!();
}
