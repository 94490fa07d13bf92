//! Mock sensor driver
//!
//! Records every register write, can be switched to fail for error-path tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use contracts::{AppliedExposure, EngineError, EngineResult, SensorDriver};
use tracing::trace;

/// In-memory [`SensorDriver`]
#[derive(Debug)]
pub struct MockSensorDriver {
    name: String,
    writes: Mutex<Vec<AppliedExposure>>,
    fail: AtomicBool,
}

impl MockSensorDriver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writes: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Make subsequent writes fail with `HardwareIo`
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Writes received so far
    pub fn writes(&self) -> Vec<AppliedExposure> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent write
    pub fn last_write(&self) -> Option<AppliedExposure> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .copied()
    }
}

impl SensorDriver for MockSensorDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_exposure(&self, applied: &AppliedExposure) -> EngineResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::hardware(&self.name, "injected i2c failure"));
        }
        trace!(
            sensor = %self.name,
            frame_id = applied.sof_frame,
            gain = applied.gain,
            time = applied.integration_time,
            "register write"
        );
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*applied);
        Ok(())
    }
}
