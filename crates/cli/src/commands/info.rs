//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{AlgoType, EngineBlueprint};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    sensor: SensorInfo,
    engine: EngineInfo,
    exposure: ExposureInfo,
    aux_light: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    algorithms: Vec<AlgoInfo>,
}

#[derive(Serialize)]
struct SensorInfo {
    name: String,
    pixel_format: String,
    width: u32,
    height: u32,
    gray_mode: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    calibrated: Vec<String>,
}

#[derive(Serialize)]
struct EngineInfo {
    working_mode: String,
    algo_mode: String,
    params_pool_size: usize,
    stats_pool_size: usize,
    stats_cache_size: usize,
    safe_enable_timeout_ms: u64,
}

#[derive(Serialize)]
struct ExposureInfo {
    time_delay: u32,
    gain_delay: u32,
    dcg_delay: u32,
}

#[derive(Serialize)]
struct AlgoInfo {
    algo: String,
    group: String,
    id: u32,
    name: String,
    version: String,
    enabled: bool,
    current: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let algorithms = if args.algos {
        registered_algorithms(&blueprint)?
    } else {
        Vec::new()
    };
    let config_info = build_config_info(&blueprint, algorithms);

    if args.json {
        let json = serde_json::to_string_pretty(&config_info)
            .context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config_info);
    }

    Ok(())
}

/// Initialize a throwaway engine to list its default handles
fn registered_algorithms(blueprint: &EngineBlueprint) -> Result<Vec<AlgoInfo>> {
    let core = analyzer::AnalyzerCore::builder(blueprint.engine.clone()).build();
    core.init().context("Failed to initialize engine")?;
    let algorithms = core
        .algorithms()
        .into_iter()
        .map(|handle| AlgoInfo {
            algo: handle.algo.name().to_string(),
            group: format!("{:?}", handle.algo.group()),
            id: handle.id,
            name: handle.name,
            version: handle.version,
            enabled: handle.enabled,
            current: handle.current,
        })
        .collect();
    core.deinit().context("Failed to release engine")?;
    Ok(algorithms)
}

fn build_config_info(blueprint: &EngineBlueprint, algorithms: Vec<AlgoInfo>) -> ConfigInfo {
    let calibrated = blueprint
        .sensor
        .calibration
        .as_object()
        .map(|table| {
            table
                .keys()
                .filter(|key| AlgoType::ALL.iter().any(|algo| algo.name() == key.as_str()))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        sensor: SensorInfo {
            name: blueprint.sensor.name.clone(),
            pixel_format: format!("{:?}", blueprint.sensor.pixel_format),
            width: blueprint.sensor.width,
            height: blueprint.sensor.height,
            gray_mode: format!("{:?}", blueprint.sensor.gray_mode),
            calibrated,
        },
        engine: EngineInfo {
            working_mode: format!("{:?}", blueprint.engine.working_mode),
            algo_mode: format!("{:?}", blueprint.engine.algo_mode),
            params_pool_size: blueprint.engine.params_pool_size,
            stats_pool_size: blueprint.engine.stats_pool_size,
            stats_cache_size: blueprint.engine.stats_cache_size,
            safe_enable_timeout_ms: blueprint.engine.safe_enable_timeout_ms,
        },
        exposure: ExposureInfo {
            time_delay: blueprint.exposure.time_delay,
            gain_delay: blueprint.exposure.gain_delay,
            dcg_delay: blueprint.exposure.dcg_delay,
        },
        aux_light: format!("{:?}", blueprint.aux_light.mode),
        algorithms,
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("\n=== Configuration Info ===\n");
    println!("Version: {}", info.version);

    println!("\nSensor:");
    println!("  Name: {}", info.sensor.name);
    println!(
        "  Output: {}x{} {}",
        info.sensor.width, info.sensor.height, info.sensor.pixel_format
    );
    println!("  Gray mode: {}", info.sensor.gray_mode);
    if !info.sensor.calibrated.is_empty() {
        println!("  Calibrated: {}", info.sensor.calibrated.join(", "));
    }

    println!("\nEngine:");
    println!("  Working mode: {}", info.engine.working_mode);
    println!("  Algorithm mode: {}", info.engine.algo_mode);
    println!(
        "  Pools: params={} stats={} cache={}",
        info.engine.params_pool_size, info.engine.stats_pool_size, info.engine.stats_cache_size
    );
    println!("  Safe enable timeout: {}ms", info.engine.safe_enable_timeout_ms);

    println!(
        "\nExposure delays: time={} gain={} dcg={}",
        info.exposure.time_delay, info.exposure.gain_delay, info.exposure.dcg_delay
    );
    println!("Aux light: {}", info.aux_light);

    if !info.algorithms.is_empty() {
        println!("\nAlgorithms ({}):", info.algorithms.len());
        for algo in &info.algorithms {
            let marker = if algo.current { "*" } else { " " };
            let state = if algo.enabled { "enabled" } else { "disabled" };
            println!(
                "  {} {:<8} [{}] #{} {} v{} ({})",
                marker, algo.algo, algo.group, algo.id, algo.name, algo.version, state
            );
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use contracts::{AlgoConfig, GrayMode, PixelFormat, SensorDescriptor};
    use serde_json::json;

    use super::*;

    fn blueprint(calibration: AlgoConfig) -> EngineBlueprint {
        EngineBlueprint {
            version: Default::default(),
            sensor: SensorDescriptor {
                name: "imx415".into(),
                pixel_format: PixelFormat::BayerRggb10,
                width: 1920,
                height: 1080,
                gray_mode: GrayMode::Auto,
                calibration,
            },
            engine: Default::default(),
            exposure: Default::default(),
            aligner: Default::default(),
            aux_light: Default::default(),
        }
    }

    #[test]
    fn test_calibrated_lists_known_algorithms_only() {
        let bp = blueprint(json!({ "ae": {}, "adrc": {}, "vendor_blob": {} }));
        let info = build_config_info(&bp, Vec::new());
        assert_eq!(info.sensor.calibrated, vec!["adrc", "ae"]);
    }

    #[test]
    fn test_registered_algorithms_cover_every_type() {
        let algorithms = registered_algorithms(&blueprint(AlgoConfig::Null)).unwrap();
        assert_eq!(algorithms.len(), AlgoType::ALL.len());
        assert!(algorithms.iter().all(|a| a.id == 0 && a.current));
    }
}
