//! 传给 `prepare` 的传感器描述

use serde::{Deserialize, Serialize};

use crate::AlgoConfig;

/// 传感器输出像素格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    BayerRggb10,
    BayerBggr10,
    BayerGrbg10,
    BayerGbrg10,
    BayerRggb12,
    /// Monochrome sensor
    Y8,
    /// Monochrome sensor
    Y10,
    /// Monochrome sensor
    Y12,
}

impl PixelFormat {
    /// Whether the sensor has no color filter array
    pub fn is_mono(self) -> bool {
        matches!(self, PixelFormat::Y8 | PixelFormat::Y10 | PixelFormat::Y12)
    }
}

/// 标定中的灰度模式策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrayMode {
    /// Color pipeline, gray only when the auxiliary light asks for it
    #[default]
    Auto,
    /// 始终灰度
    On,
    /// 从不灰度
    Off,
}

/// 传感器描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub name: String,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Gray mode setting from calibration
    #[serde(default)]
    pub gray_mode: GrayMode,
    /// 不透明的标定文档，由调参协作方持有
    #[serde(default, skip_serializing_if = "AlgoConfig::is_null")]
    pub calibration: AlgoConfig,
}

impl SensorDescriptor {
    /// Derive black-white and gray-mode flags
    pub fn flags(&self) -> SensorFlags {
        let black_white = self.pixel_format.is_mono();
        let gray_mode = match self.gray_mode {
            GrayMode::On => true,
            GrayMode::Off => black_white,
            GrayMode::Auto => black_white,
        };
        SensorFlags {
            black_white,
            gray_mode,
        }
    }
}

/// prepare 时从传感器推导出的标志
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFlags {
    /// Monochrome sensor
    pub black_white: bool,
    /// 图像 pipeline 以灰度模式运行
    pub gray_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(pixel_format: PixelFormat, gray_mode: GrayMode) -> SensorDescriptor {
        SensorDescriptor {
            name: "test".into(),
            pixel_format,
            width: 1920,
            height: 1080,
            gray_mode,
            calibration: AlgoConfig::Null,
        }
    }

    #[test]
    fn test_mono_sensor_forces_gray() {
        let flags = descriptor(PixelFormat::Y10, GrayMode::Off).flags();
        assert!(flags.black_white);
        assert!(flags.gray_mode);
    }

    #[test]
    fn test_color_sensor_gray_from_calibration() {
        assert!(!descriptor(PixelFormat::BayerRggb10, GrayMode::Auto).flags().gray_mode);
        assert!(descriptor(PixelFormat::BayerRggb10, GrayMode::On).flags().gray_mode);
    }
}
