//! Auxiliary light (CPSL) result generator.
//!
//! Runs at the end of every pass. In auto mode the light follows the
//! exposure sensitivity with hysteresis and a minimum hold time between
//! switches.

use contracts::{
    AuxLightCapability, AuxLightConfig, AuxLightMode, AuxLightResult, AuxLightSource,
    EngineError, EngineResult, ExposureUpdate, SensorFlags,
};
use tracing::{debug, info};

#[derive(Debug)]
pub struct AuxLightController {
    capability: AuxLightCapability,
    config: AuxLightConfig,
    light_on: bool,
    frames_since_switch: u32,
}

impl AuxLightController {
    pub fn new(capability: AuxLightCapability) -> Self {
        Self {
            capability,
            config: AuxLightConfig::default(),
            light_on: false,
            frames_since_switch: 0,
        }
    }

    pub fn capability(&self) -> &AuxLightCapability {
        &self.capability
    }

    /// Replace the detected capability; the configuration falls back to off
    pub fn set_capability(&mut self, capability: AuxLightCapability) {
        info!(
            sources = ?capability.sources,
            modes = ?capability.modes,
            max_strength = capability.max_strength,
            "aux light capability detected"
        );
        self.capability = capability;
        self.config = AuxLightConfig::default();
        self.light_on = false;
    }

    pub fn config(&self) -> &AuxLightConfig {
        &self.config
    }

    pub fn is_on(&self) -> bool {
        self.light_on
    }

    /// Apply a new configuration
    ///
    /// # Errors
    /// - `UnsupportedMode` when the device lacks the mode or the source
    /// - `Config` for out-of-range strength or inverted auto thresholds
    pub fn set_config(&mut self, config: AuxLightConfig) -> EngineResult<()> {
        if !self.capability.modes.contains(&config.mode) {
            return Err(EngineError::UnsupportedMode {
                message: format!("aux light mode {:?} not supported", config.mode),
            });
        }
        if config.mode != AuxLightMode::Off {
            if !self.capability.sources.contains(&config.source) {
                return Err(EngineError::UnsupportedMode {
                    message: format!("aux light source {:?} not present", config.source),
                });
            }
            if config.strength > self.capability.max_strength.min(100) {
                return Err(EngineError::config(
                    "aux_light.strength",
                    format!(
                        "strength {} exceeds maximum {}",
                        config.strength,
                        self.capability.max_strength.min(100)
                    ),
                ));
            }
        }
        if config.off_sensitivity > config.on_sensitivity {
            return Err(EngineError::config(
                "aux_light.off_sensitivity",
                "off_sensitivity must not exceed on_sensitivity",
            ));
        }

        self.light_on = match config.mode {
            AuxLightMode::Off => false,
            AuxLightMode::On => true,
            AuxLightMode::Auto => self.light_on && config.source == self.config.source,
        };
        // a fresh configuration may switch right away
        self.frames_since_switch = config.hold_frames;
        self.config = config;
        debug!(mode = ?config.mode, source = ?config.source, strength = config.strength, "aux light configured");
        Ok(())
    }

    /// Compute the light decision for one pass
    pub fn generate(&mut self, exposure: Option<&ExposureUpdate>, flags: SensorFlags) -> AuxLightResult {
        self.frames_since_switch = self.frames_since_switch.saturating_add(1);

        match self.config.mode {
            AuxLightMode::Off => self.light_on = false,
            AuxLightMode::On => self.light_on = true,
            AuxLightMode::Auto => {
                if let Some(exposure) = exposure {
                    self.auto_switch(exposure.sensitivity());
                }
            }
        }

        AuxLightResult {
            light_on: self.light_on,
            source: self.config.source,
            strength: if self.light_on { self.config.strength } else { 0 },
            gray_mode: flags.gray_mode
                || (self.light_on && self.config.source == AuxLightSource::Ir),
        }
    }

    fn auto_switch(&mut self, sensitivity: f32) {
        if self.frames_since_switch < self.config.hold_frames {
            return;
        }
        let switch = if self.light_on {
            sensitivity <= self.config.off_sensitivity
        } else {
            sensitivity >= self.config.on_sensitivity
        };
        if switch {
            self.light_on = !self.light_on;
            self.frames_since_switch = 0;
            info!(light_on = self.light_on, sensitivity, "aux light switched");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ir_capability() -> AuxLightCapability {
        AuxLightCapability {
            sources: vec![AuxLightSource::Ir],
            modes: vec![AuxLightMode::Off, AuxLightMode::On, AuxLightMode::Auto],
            max_strength: 100,
        }
    }

    fn auto(hold_frames: u32) -> AuxLightConfig {
        AuxLightConfig {
            mode: AuxLightMode::Auto,
            source: AuxLightSource::Ir,
            strength: 60,
            on_sensitivity: 0.4,
            off_sensitivity: 0.05,
            hold_frames,
        }
    }

    fn exposure(sensitivity: f32) -> ExposureUpdate {
        ExposureUpdate::linear(0, sensitivity / 0.01, 0.01)
    }

    #[test]
    fn test_rejects_unsupported_config() {
        let mut ctrl = AuxLightController::new(AuxLightCapability::none());
        assert!(matches!(
            ctrl.set_config(auto(0)),
            Err(EngineError::UnsupportedMode { .. })
        ));
        assert!(ctrl.set_config(AuxLightConfig::default()).is_ok());

        let mut ctrl = AuxLightController::new(ir_capability());
        let mut led = auto(0);
        led.source = AuxLightSource::Led;
        assert!(matches!(
            ctrl.set_config(led),
            Err(EngineError::UnsupportedMode { .. })
        ));

        let mut strong = auto(0);
        strong.strength = 101;
        assert!(matches!(ctrl.set_config(strong), Err(EngineError::Config { .. })));

        let mut inverted = auto(0);
        inverted.off_sensitivity = 1.0;
        assert!(ctrl.set_config(inverted).is_err());
        assert_eq!(ctrl.config().mode, AuxLightMode::Off);
    }

    #[test]
    fn test_auto_hysteresis_and_hold() {
        let mut ctrl = AuxLightController::new(ir_capability());
        ctrl.set_config(auto(3)).unwrap();
        let flags = SensorFlags::default();

        let dark = exposure(0.5);
        let on = ctrl.generate(Some(&dark), flags);
        assert!(on.light_on);
        assert_eq!(on.strength, 60);
        assert!(on.gray_mode);

        // between thresholds: no change; below off threshold but held
        let mid = exposure(0.2);
        assert!(ctrl.generate(Some(&mid), flags).light_on);
        let bright = exposure(0.01);
        assert!(ctrl.generate(Some(&bright), flags).light_on);

        let off = ctrl.generate(Some(&bright), flags);
        assert!(!off.light_on);
        assert_eq!(off.strength, 0);
        assert!(!off.gray_mode);
    }

    #[test]
    fn test_gray_mode_follows_sensor_flags() {
        let mut ctrl = AuxLightController::new(ir_capability());
        let mono = SensorFlags {
            black_white: true,
            gray_mode: true,
        };
        let result = ctrl.generate(None, mono);
        assert!(!result.light_on);
        assert!(result.gray_mode);

        ctrl.set_config(AuxLightConfig {
            mode: AuxLightMode::On,
            ..auto(0)
        })
        .unwrap();
        assert!(ctrl.generate(None, SensorFlags::default()).light_on);
    }
}
