//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{AlgoMode, AuxLightMode, EngineBlueprint, WorkingMode};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    sensor: String,
    working_mode: String,
    algo_mode: String,
    calibrated_algos: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    sensor: blueprint.sensor.name.clone(),
                    working_mode: format!("{:?}", blueprint.engine.working_mode),
                    algo_mode: format!("{:?}", blueprint.engine.algo_mode),
                    calibrated_algos: blueprint
                        .sensor
                        .calibration
                        .as_object()
                        .map_or(0, |table| table.len()),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &EngineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sensor.calibration.is_null() {
        warnings.push("No calibration - built-in algorithms run with defaults".to_string());
    }

    if blueprint.engine.working_mode != WorkingMode::Normal && blueprint.aligner.multi_camera {
        warnings.push(
            "aligner.multi_camera disables extra readback passes in HDR mode".to_string(),
        );
    }

    if blueprint.engine.params_pool_size < 3 {
        warnings.push(format!(
            "params_pool_size = {} leaves little room for slow result consumers",
            blueprint.engine.params_pool_size
        ));
    }

    if blueprint.engine.algo_mode == AlgoMode::Multi {
        warnings.push("algo_mode = multi only runs several handles for ae, awb and af".to_string());
    }

    if blueprint.aux_light.mode != AuxLightMode::Off {
        warnings.push(
            "aux_light is applied only when the device reports the requested mode".to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Sensor: {}", summary.sensor);
            println!("  Working mode: {}", summary.working_mode);
            println!("  Algorithm mode: {}", summary.algo_mode);
            println!("  Calibrated algorithms: {}", summary.calibrated_algos);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;

    fn args_for(content: &str) -> (tempfile::NamedTempFile, ValidateArgs) {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };
        (file, args)
    }

    #[test]
    fn test_valid_config_warns_without_calibration() {
        let (_file, args) = args_for(
            "[sensor]\nname = \"imx415\"\npixel_format = \"bayer_rggb10\"\nwidth = 640\nheight = 480\n",
        );
        let result = validate_config(&args);
        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("No calibration")));
        assert_eq!(result.summary.unwrap().sensor, "imx415");
    }

    #[test]
    fn test_invalid_config_reports_error() {
        let (_file, args) = args_for(
            "[sensor]\nname = \"\"\npixel_format = \"bayer_rggb10\"\nwidth = 640\nheight = 480\n",
        );
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("sensor.name"));
    }

    #[test]
    fn test_missing_file() {
        let args = ValidateArgs {
            config: PathBuf::from("/nonexistent/engine.toml"),
            json: false,
        };
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }
}
