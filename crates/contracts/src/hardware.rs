//! Collaborator traits
//!
//! Hardware access and cross-component lookups are behind these traits so
//! the engine crates never depend on a concrete driver.

use std::sync::Arc;

use crate::{AppliedExposure, AuxLightCapability, EngineResult, ExposureUpdate, RawBuffer, SyncGroup};

/// Sensor register writer
///
/// Called from the start-of-frame path, implementations must not block for
/// longer than a register transaction.
pub trait SensorDriver: Send + Sync {
    /// Sensor name (used for logging)
    fn name(&self) -> &str;

    /// Write composed exposure registers
    ///
    /// # Errors
    /// Returns `EngineError::HardwareIo` when the transaction fails
    fn write_exposure(&self, applied: &AppliedExposure) -> EngineResult<()>;
}

/// ISP raw readback device
pub trait ReadbackDevice: Send + Sync {
    /// Device name (used for logging)
    fn name(&self) -> &str;

    /// Request `passes` hardware iterations over the group
    ///
    /// # Errors
    /// Returns `EngineError::HardwareIo` when the command is rejected
    fn trigger_readback(&self, group: &SyncGroup, passes: u8) -> EngineResult<()>;

    /// Return a buffer descriptor to its capture queue
    fn recycle(&self, buffer: RawBuffer);
}

/// Auxiliary light device
pub trait AuxLightDevice: Send + Sync {
    /// Probe supported sources and modes
    fn capability(&self) -> AuxLightCapability;
}

/// Answers "which exposure was in effect on frame F"
pub trait EffectiveExposureSource: Send + Sync {
    /// Floor lookup of the effective exposure; `None` until primed
    fn effective_exposure(&self, frame_id: u64) -> Option<ExposureUpdate>;
}

/// Shared sensor driver
pub type SharedSensorDriver = Arc<dyn SensorDriver>;

/// Shared readback device
pub type SharedReadbackDevice = Arc<dyn ReadbackDevice>;
