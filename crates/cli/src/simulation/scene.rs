//! Scene model turning exposure into reported statistics.

use contracts::ExposureUpdate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Mean luma produced per unit of sensitivity (gain x seconds) at brightness 1.0
const LUMA_PER_SENSITIVITY: f32 = 2500.0;
/// Sensitivity of a sensor nobody has programmed yet
const POWER_ON_SENSITIVITY: f32 = 0.01;

/// Static scene with multiplicative luma noise
#[derive(Debug)]
pub struct Scene {
    brightness: f32,
    noise: f32,
    rng: StdRng,
}

impl Scene {
    pub fn new(brightness: f32, noise: f32, seed: u64) -> Self {
        Self {
            brightness: brightness.max(0.0),
            noise: noise.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Mean luma the hardware reports for a frame captured with `exposure`
    pub fn mean_luma(&mut self, exposure: Option<&ExposureUpdate>) -> f32 {
        let sensitivity = exposure
            .map(ExposureUpdate::sensitivity)
            .unwrap_or(POWER_ON_SENSITIVITY);
        let jitter = if self.noise > 0.0 {
            self.rng.random_range(-self.noise..=self.noise)
        } else {
            0.0
        };
        (sensitivity * self.brightness * LUMA_PER_SENSITIVITY * (1.0 + jitter)).clamp(0.0, 255.0)
    }
}
