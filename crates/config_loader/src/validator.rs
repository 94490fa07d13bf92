//! 蓝图校验
//!
//! 规则：
//! - 契约类型上声明的字段范围 (池容量、窗口、pass 上限)
//! - 传感器名称非空，输出尺寸非零
//! - gain 与 DCG 延迟不超过积分时间延迟
//! - 补光强度为百分比，关闭阈值不高于开启阈值
//! - 统计缓存至少为生产者留下一个统计记录

use contracts::{EngineBlueprint, EngineError, EngineResult};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// 校验 [`EngineBlueprint`]
///
/// 返回发现的第一个违规项。
pub fn validate(blueprint: &EngineBlueprint) -> EngineResult<()> {
    validate_ranges(blueprint)?;
    validate_sensor(blueprint)?;
    validate_exposure_delays(blueprint)?;
    validate_aux_light(blueprint)?;
    validate_pools(blueprint)?;
    Ok(())
}

fn validate_ranges(blueprint: &EngineBlueprint) -> EngineResult<()> {
    blueprint.validate().map_err(|errors| {
        let (field, message) = first_violation("", &errors);
        EngineError::config(field, message)
    })
}

/// 沿嵌套校验错误找到第一个字段错误
fn first_violation(prefix: &str, errors: &ValidationErrors) -> (String, String) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(violations) => {
                if let Some(violation) = violations.first() {
                    let message = violation
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' check", violation.code));
                    return (path, message);
                }
            }
            ValidationErrorsKind::Struct(inner) => return first_violation(&path, inner),
            ValidationErrorsKind::List(items) => {
                if let Some((index, inner)) = items.iter().next() {
                    return first_violation(&format!("{path}[{index}]"), inner);
                }
            }
        }
    }
    (prefix.to_string(), "invalid value".to_string())
}

fn validate_sensor(blueprint: &EngineBlueprint) -> EngineResult<()> {
    let sensor = &blueprint.sensor;
    if sensor.name.trim().is_empty() {
        return Err(EngineError::config("sensor.name", "sensor name cannot be empty"));
    }
    if sensor.width == 0 || sensor.height == 0 {
        return Err(EngineError::config(
            "sensor.width / sensor.height",
            format!(
                "output size must be non-zero, got {}x{}",
                sensor.width, sensor.height
            ),
        ));
    }
    if !sensor.calibration.is_null() && !sensor.calibration.is_object() {
        return Err(EngineError::config(
            "sensor.calibration",
            "calibration must be a table keyed by algorithm name",
        ));
    }
    Ok(())
}

fn validate_exposure_delays(blueprint: &EngineBlueprint) -> EngineResult<()> {
    blueprint
        .exposure
        .check_order()
        .map_err(|(field, message)| EngineError::config(field, message))
}

fn validate_aux_light(blueprint: &EngineBlueprint) -> EngineResult<()> {
    let aux = &blueprint.aux_light;
    if aux.strength > 100 {
        return Err(EngineError::config(
            "aux_light.strength",
            format!("strength must be <= 100, got {}", aux.strength),
        ));
    }
    if aux.off_sensitivity > aux.on_sensitivity {
        return Err(EngineError::config(
            "aux_light.off_sensitivity",
            format!(
                "off_sensitivity ({}) must be <= on_sensitivity ({})",
                aux.off_sensitivity, aux.on_sensitivity
            ),
        ));
    }
    Ok(())
}

fn validate_pools(blueprint: &EngineBlueprint) -> EngineResult<()> {
    let engine = &blueprint.engine;
    if engine.stats_cache_size >= engine.stats_pool_size {
        return Err(EngineError::config(
            "engine.stats_cache_size",
            format!(
                "stats_cache_size ({}) must be < stats_pool_size ({})",
                engine.stats_cache_size, engine.stats_pool_size
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use contracts::{
        AlgoConfig, AlignerConfig, AuxLightConfig, ConfigVersion, EngineConfig, ExposureDelays,
        GrayMode, PixelFormat, SensorDescriptor,
    };

    use super::*;

    fn minimal_blueprint() -> EngineBlueprint {
        EngineBlueprint {
            version: ConfigVersion::V1,
            sensor: SensorDescriptor {
                name: "imx415".into(),
                pixel_format: PixelFormat::BayerRggb10,
                width: 3840,
                height: 2160,
                gray_mode: GrayMode::Auto,
                calibration: AlgoConfig::Null,
            },
            engine: EngineConfig::default(),
            exposure: ExposureDelays::default(),
            aligner: AlignerConfig::default(),
            aux_light: AuxLightConfig::default(),
        }
    }

    fn field_of(result: EngineResult<()>) -> String {
        match result {
            Err(EngineError::Config { field, .. }) => field,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_blueprint()).is_ok());
    }

    #[test]
    fn test_range_violation_reports_nested_field() {
        let mut bp = minimal_blueprint();
        bp.engine.params_pool_size = 0;
        assert_eq!(field_of(validate(&bp)), "engine.params_pool_size");

        // the bootstrap result of each group needs its own record
        bp.engine.params_pool_size = 1;
        assert_eq!(field_of(validate(&bp)), "engine.params_pool_size");
        bp.engine.params_pool_size = 2;
        assert!(validate(&bp).is_ok());

        let mut bp = minimal_blueprint();
        bp.aligner.max_extra_passes = 5;
        assert_eq!(field_of(validate(&bp)), "aligner.max_extra_passes");
    }

    #[test]
    fn test_empty_sensor_name() {
        let mut bp = minimal_blueprint();
        bp.sensor.name = "  ".into();
        assert_eq!(field_of(validate(&bp)), "sensor.name");
    }

    #[test]
    fn test_zero_output_size() {
        let mut bp = minimal_blueprint();
        bp.sensor.height = 0;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("3840x0"), "got: {err}");
    }

    #[test]
    fn test_calibration_must_be_table() {
        let mut bp = minimal_blueprint();
        bp.sensor.calibration = AlgoConfig::from(3);
        assert_eq!(field_of(validate(&bp)), "sensor.calibration");
    }

    #[test]
    fn test_gain_delay_exceeds_time_delay() {
        let mut bp = minimal_blueprint();
        bp.exposure = ExposureDelays::new(1, 2, 1);
        assert_eq!(field_of(validate(&bp)), "exposure.gain_delay");
    }

    #[test]
    fn test_aux_light_bounds() {
        let mut bp = minimal_blueprint();
        bp.aux_light.strength = 150;
        assert_eq!(field_of(validate(&bp)), "aux_light.strength");

        let mut bp = minimal_blueprint();
        bp.aux_light.off_sensitivity = 0.9;
        assert_eq!(field_of(validate(&bp)), "aux_light.off_sensitivity");
    }

    #[test]
    fn test_stats_cache_must_leave_free_records() {
        let mut bp = minimal_blueprint();
        bp.engine.stats_cache_size = bp.engine.stats_pool_size;
        assert_eq!(field_of(validate(&bp)), "engine.stats_cache_size");
    }
}
