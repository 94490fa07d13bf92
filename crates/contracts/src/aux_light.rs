//! Auxiliary light (CPSL) contracts

use serde::{Deserialize, Serialize};

/// Light control mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxLightMode {
    #[default]
    Off,
    On,
    /// Switch following the exposure state
    Auto,
}

/// Light source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxLightSource {
    Led,
    #[default]
    Ir,
}

/// Requested light configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxLightConfig {
    pub mode: AuxLightMode,
    pub source: AuxLightSource,
    /// Strength in percent (0-100)
    pub strength: u8,
    /// Sensitivity (gain x time) above which auto mode switches on
    pub on_sensitivity: f32,
    /// Sensitivity below which auto mode switches off
    pub off_sensitivity: f32,
    /// Minimum frames between two auto switches
    pub hold_frames: u32,
}

impl Default for AuxLightConfig {
    fn default() -> Self {
        Self {
            mode: AuxLightMode::Off,
            source: AuxLightSource::Ir,
            strength: 0,
            on_sensitivity: 0.4,
            off_sensitivity: 0.05,
            hold_frames: 30,
        }
    }
}

/// What the light hardware supports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxLightCapability {
    pub sources: Vec<AuxLightSource>,
    pub modes: Vec<AuxLightMode>,
    /// Maximum strength in percent
    pub max_strength: u8,
}

impl AuxLightCapability {
    /// Capability of a board without any auxiliary light
    pub fn none() -> Self {
        Self {
            sources: Vec::new(),
            modes: vec![AuxLightMode::Off],
            max_strength: 0,
        }
    }

    /// Whether any light source is present
    pub fn is_present(&self) -> bool {
        !self.sources.is_empty()
    }
}

/// Light decision published with every pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxLightResult {
    pub light_on: bool,
    pub source: AuxLightSource,
    pub strength: u8,
    /// Image pipeline should run in gray mode
    pub gray_mode: bool,
}
