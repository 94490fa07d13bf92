//! # Config Loader
//!
//! 加载引擎蓝图：传感器描述、池容量、曝光延迟、对齐策略与补光默认值。
//!
//! 职责：
//! - 解析 TOML/JSON 配置文件
//! - 校验配置合法性
//! - 生成 `EngineBlueprint`
//!
//! # 使用示例
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("config/example.toml")).unwrap();
//! println!("sensor: {}", blueprint.sensor.name);
//! ```

mod parser;
mod validator;

pub use contracts::EngineBlueprint;
pub use parser::ConfigFormat;

use contracts::{EngineError, EngineResult};
use std::path::Path;
use tracing::debug;

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从文件路径加载配置
    ///
    /// 格式由扩展名决定 (.toml / .json)。
    ///
    /// # Errors
    /// - `Io`: 文件无法读取
    /// - `ConfigParse`: 未知格式或语法错误
    /// - `Config`: 非法取值
    pub fn load_from_path(path: &Path) -> EngineResult<EngineBlueprint> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let blueprint = Self::load_from_str(&content, format)?;
        debug!(path = %path.display(), sensor = %blueprint.sensor.name, "config loaded");
        Ok(blueprint)
    }

    /// 从字符串加载配置
    pub fn load_from_str(content: &str, format: ConfigFormat) -> EngineResult<EngineBlueprint> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// 校验代码构造的蓝图
    pub fn validate(blueprint: &EngineBlueprint) -> EngineResult<()> {
        validator::validate(blueprint)
    }

    pub fn to_toml(blueprint: &EngineBlueprint) -> EngineResult<String> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| EngineError::config_parse(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(blueprint: &EngineBlueprint) -> EngineResult<String> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| EngineError::config_parse(format!("JSON serialize error: {e}")))
    }

    fn detect_format(path: &Path) -> EngineResult<ConfigFormat> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            EngineError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext)
            .ok_or_else(|| EngineError::config_parse(format!("unsupported config format: .{ext}")))
    }
}
