//! 引擎配置契约，由加载器、引擎各 crate 与 CLI 共享

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{AuxLightConfig, SensorDescriptor, WorkingMode, MAX_READBACK_PASSES};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整引擎配置 (Config Loader 输出)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EngineBlueprint {
    #[serde(default)]
    pub version: ConfigVersion,

    /// 挂接到引擎的传感器
    pub sensor: SensorDescriptor,

    #[serde(default)]
    #[validate(nested)]
    pub engine: EngineConfig,

    #[serde(default)]
    #[validate(nested)]
    pub exposure: ExposureDelays,

    #[serde(default)]
    #[validate(nested)]
    pub aligner: AlignerConfig,

    #[serde(default)]
    pub aux_light: AuxLightConfig,
}

/// 注册表模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgoMode {
    /// 每种类型一个当前句柄
    #[default]
    Single,
    /// ae/awb/af 可同时运行多个当前句柄
    Multi,
}

/// AnalyzerCore sizing and timing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    pub working_mode: WorkingMode,

    pub algo_mode: AlgoMode,

    /// 池中 FullParams 记录数；prepare 会同时发布两条
    #[validate(range(min = 2, max = 64))]
    pub params_pool_size: usize,

    /// 池中 StatsSnapshot 记录数
    #[validate(range(min = 1, max = 64))]
    pub stats_pool_size: usize,

    /// StatsCache 槽位数
    #[validate(range(min = 1, max = 64))]
    pub stats_cache_size: usize,

    /// 安全启用屏障的上限
    #[validate(range(min = 1))]
    pub safe_enable_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            working_mode: WorkingMode::Normal,
            algo_mode: AlgoMode::Single,
            params_pool_size: 4,
            stats_pool_size: 8,
            stats_cache_size: 3,
            safe_enable_timeout_ms: 1000,
        }
    }
}

/// 曝光生效延迟 (帧)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExposureDelays {
    pub time_delay: u32,
    pub gain_delay: u32,
    pub dcg_delay: u32,
    /// EffectiveExposureMap 容量
    #[validate(range(min = 1))]
    pub effective_window: usize,
}

fn default_effective_window() -> usize {
    10
}

impl ExposureDelays {
    /// Delays with the default map window
    pub fn new(time_delay: u32, gain_delay: u32, dcg_delay: u32) -> Self {
        Self {
            time_delay,
            gain_delay,
            dcg_delay,
            effective_window: default_effective_window(),
        }
    }

    /// gain 寄存器落后 time 寄存器的帧数
    pub fn gain_lag(&self) -> u32 {
        self.time_delay.saturating_sub(self.gain_delay)
    }

    /// DCG 寄存器落后 time 寄存器的帧数
    pub fn dcg_lag(&self) -> u32 {
        self.time_delay.saturating_sub(self.dcg_delay)
    }

    /// gain 与 DCG 生效不得晚于积分时间
    pub fn check_order(&self) -> Result<(), (&'static str, String)> {
        if self.gain_delay > self.time_delay {
            return Err((
                "exposure.gain_delay",
                format!(
                    "gain_delay ({}) must not exceed time_delay ({})",
                    self.gain_delay, self.time_delay
                ),
            ));
        }
        if self.dcg_delay > self.time_delay {
            return Err((
                "exposure.dcg_delay",
                format!(
                    "dcg_delay ({}) must not exceed time_delay ({})",
                    self.dcg_delay, self.time_delay
                ),
            ));
        }
        Ok(())
    }
}

impl Default for ExposureDelays {
    fn default() -> Self {
        Self::new(2, 2, 1)
    }
}

/// StreamAligner 策略
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AlignerConfig {
    /// 每通道保留的待匹配缓冲数，超出后回收最旧的
    #[validate(range(min = 1))]
    pub max_channel_depth: usize,

    /// 亮度提示表容量
    #[validate(range(min = 1))]
    pub luma_hint_window: usize,

    /// 全局色调映射增加一次 readback pass
    pub global_tmo: bool,

    /// 去雾增加一次 readback pass
    pub dehaze: bool,

    /// 多摄像头共享 readback 引擎，禁用额外 pass
    pub multi_camera: bool,

    /// 首次之外的 pass 上限
    #[validate(range(max = 2))]
    pub max_extra_passes: u8,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            max_channel_depth: 8,
            luma_hint_window: 10,
            global_tmo: false,
            dehaze: false,
            multi_camera: false,
            max_extra_passes: MAX_READBACK_PASSES - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_order() {
        assert!(ExposureDelays::new(2, 2, 1).check_order().is_ok());
        let (field, _) = ExposureDelays::new(1, 2, 0).check_order().unwrap_err();
        assert_eq!(field, "exposure.gain_delay");
        let (field, _) = ExposureDelays::new(2, 1, 3).check_order().unwrap_err();
        assert_eq!(field, "exposure.dcg_delay");
    }

    #[test]
    fn test_lags() {
        let d = ExposureDelays::new(3, 1, 3);
        assert_eq!(d.gain_lag(), 2);
        assert_eq!(d.dcg_lag(), 0);
    }

    #[test]
    fn test_range_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());
        config.params_pool_size = 0;
        assert!(config.validate().is_err());

        let mut aligner = AlignerConfig::default();
        aligner.max_extra_passes = 3;
        assert!(aligner.validate().is_err());
    }
}
