//! Per-sensor exposure synchronization.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::{
    AppliedExposure, EffectiveExposureSource, EngineError, EngineResult, ExposureDelays,
    ExposureUpdate, FloorMap, SharedSensorDriver,
};
use tracing::{debug, instrument, warn};

use crate::delay::DelayQueues;

struct ControllerState {
    queues: DelayQueues,
    effective: FloorMap<ExposureUpdate>,
    last_sof: Option<u64>,
    sof_gaps: u64,
}

/// Tracks in-flight exposure updates and the exposure effective on each frame
///
/// Writes happen on start of frame only. An update whose time register is
/// written on frame `f` is visible in statistics from frame `f + time_delay`.
pub struct ExposureSyncController {
    driver: SharedSensorDriver,
    state: Mutex<ControllerState>,
}

impl fmt::Debug for ExposureSyncController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ExposureSyncController")
            .field("sensor", &self.driver.name())
            .field("delays", &state.queues.delays())
            .field("pending", &state.queues.pending_len())
            .field("last_sof", &state.last_sof)
            .finish()
    }
}

impl ExposureSyncController {
    /// Create a controller for one sensor
    ///
    /// # Errors
    /// `EngineError::Config` when gain or DCG delay exceeds the time delay
    pub fn new(driver: SharedSensorDriver, delays: ExposureDelays) -> EngineResult<Self> {
        check_delays(&delays)?;
        Ok(Self {
            driver,
            state: Mutex::new(ControllerState {
                queues: DelayQueues::new(delays),
                effective: FloorMap::new(delays.effective_window),
                last_sof: None,
                sof_gaps: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configure register delays in frames
    ///
    /// # Errors
    /// `EngineError::Config` when `gain > time` or `dcg > time`; the current
    /// configuration is left untouched.
    pub fn set_delays(&self, time: u32, gain: u32, dcg: u32) -> EngineResult<()> {
        let mut state = self.lock();
        let delays = ExposureDelays {
            time_delay: time,
            gain_delay: gain,
            dcg_delay: dcg,
            effective_window: state.queues.delays().effective_window,
        };
        check_delays(&delays)?;
        state.queues.set_delays(delays);
        debug!(time, gain, dcg, "exposure delays updated");
        Ok(())
    }

    /// Current delays
    pub fn delays(&self) -> ExposureDelays {
        self.lock().queues.delays()
    }

    /// Queue a single exposure decision
    pub fn set_exposure(&self, update: ExposureUpdate) {
        self.lock().queues.push(update);
    }

    /// Queue a multi-entry exposure table
    pub fn set_exposure_table(&self, table: &[ExposureUpdate]) {
        let pruned = self.lock().queues.push_table(table);
        if pruned > 0 {
            debug!(pruned, appended = table.len(), "pruned overlapping exposure table");
        }
    }

    /// Write `update` right away and seed the effective map with it
    ///
    /// # Errors
    /// `EngineError::HardwareIo` from the driver; nothing is recorded then.
    pub fn prime(&self, update: ExposureUpdate) -> EngineResult<()> {
        let mut state = self.lock();
        let frame = state.last_sof.unwrap_or(0);

        let mut seeded = DelayQueues::new(state.queues.delays());
        seeded.seed(update);
        if let Some(composition) = seeded.compose() {
            self.driver.write_exposure(&composition.applied(frame))?;
        }

        state.queues.seed(update);
        state.effective.insert(frame, update);
        debug!(frame_id = frame, "exposure primed");
        Ok(())
    }

    /// Clear queues, effective map and frame tracking
    pub fn reset(&self) {
        let mut state = self.lock();
        state.queues.clear();
        state.effective.clear();
        state.last_sof = None;
    }

    /// Start-of-frame tick
    ///
    /// Returns the composed write, or `None` when nothing has ever been queued.
    ///
    /// # Errors
    /// `EngineError::HardwareIo` from the driver. The cycle is dropped: queues
    /// and effective map are left as they were so the write is retried on the
    /// next frame.
    #[instrument(name = "exposure_sof", level = "debug", skip(self))]
    pub fn handle_sof(&self, frame: u64) -> EngineResult<Option<AppliedExposure>> {
        let mut state = self.lock();

        if let Some(last) = state.last_sof {
            if frame > last + 1 {
                let missed = frame - last - 1;
                state.sof_gaps += missed;
                metrics::counter!("isp3a_sof_gaps_total").increment(missed);
                warn!(frame_id = frame, last_frame = last, missed, "frame counter gap");
            } else if frame <= last {
                warn!(frame_id = frame, last_frame = last, "non-increasing start of frame");
            }
        }
        state.last_sof = Some(frame);

        if !state.queues.is_seeded() {
            let Some(first) = state.queues.compose() else {
                return Ok(None);
            };
            state.queues.seed(first.time);
        }
        let Some(composition) = state.queues.compose() else {
            return Ok(None);
        };

        let applied = composition.applied(frame);
        self.driver.write_exposure(&applied)?;
        state.queues.commit(&composition);

        if composition.fresh {
            let visible_at = frame + u64::from(state.queues.delays().time_delay);
            let evicted = state.effective.insert(visible_at, composition.time);
            debug!(
                frame_id = frame,
                visible_at,
                source = composition.time.frame_id,
                evicted,
                "exposure applied"
            );
        }
        Ok(Some(applied))
    }

    /// Exposure in effect on `frame_id` (floor lookup)
    pub fn get_effective_exp_params(&self, frame_id: u64) -> Option<ExposureUpdate> {
        self.lock().effective.floor(frame_id).copied()
    }

    /// Updates queued but not yet written
    pub fn pending_len(&self) -> usize {
        self.lock().queues.pending_len()
    }

    /// Total missed frames seen on the start-of-frame counter
    pub fn sof_gaps(&self) -> u64 {
        self.lock().sof_gaps
    }

    /// Sensor driver name
    pub fn sensor_name(&self) -> &str {
        self.driver.name()
    }
}

impl EffectiveExposureSource for ExposureSyncController {
    fn effective_exposure(&self, frame_id: u64) -> Option<ExposureUpdate> {
        self.get_effective_exp_params(frame_id)
    }
}

fn check_delays(delays: &ExposureDelays) -> EngineResult<()> {
    delays
        .check_order()
        .map_err(|(field, message)| EngineError::config(field, message))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::MockSensorDriver;

    fn controller(delays: ExposureDelays) -> (Arc<MockSensorDriver>, ExposureSyncController) {
        let driver = Arc::new(MockSensorDriver::new("imx415"));
        let ctrl = ExposureSyncController::new(driver.clone(), delays).unwrap();
        (driver, ctrl)
    }

    fn update(frame_id: u64) -> ExposureUpdate {
        ExposureUpdate::linear(frame_id, 1.0 + frame_id as f32, 0.01)
    }

    #[test]
    fn test_invalid_delays_rejected_without_mutation() {
        let (_, ctrl) = controller(ExposureDelays::new(2, 2, 1));
        let err = ctrl.set_delays(1, 2, 0).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
        assert_eq!(ctrl.delays(), ExposureDelays::new(2, 2, 1));

        assert!(ctrl.set_delays(2, 1, 3).is_err());
        assert_eq!(ctrl.delays(), ExposureDelays::new(2, 2, 1));
        assert!(ExposureSyncController::new(
            Arc::new(MockSensorDriver::new("x")),
            ExposureDelays::new(0, 1, 0)
        )
        .is_err());
    }

    #[test]
    fn test_effective_map_keyed_at_frame_plus_time_delay() {
        let (driver, ctrl) = controller(ExposureDelays::new(2, 2, 2));
        ctrl.set_exposure(update(10));
        let applied = ctrl.handle_sof(20).unwrap().unwrap();
        assert_eq!(applied.time_source, 10);
        assert_eq!(driver.writes().len(), 1);

        assert_eq!(ctrl.get_effective_exp_params(22).unwrap().frame_id, 10);
        assert_eq!(ctrl.get_effective_exp_params(30).unwrap().frame_id, 10);
        // below every key falls back to the latest entry
        assert_eq!(ctrl.get_effective_exp_params(5).unwrap().frame_id, 10);
    }

    #[test]
    fn test_floor_lookup_until_next_insertion() {
        let (_, ctrl) = controller(ExposureDelays::new(1, 1, 1));
        ctrl.prime(update(0)).unwrap();
        ctrl.set_exposure(update(3));
        ctrl.handle_sof(3).unwrap();
        ctrl.handle_sof(4).unwrap();
        ctrl.handle_sof(5).unwrap();
        ctrl.set_exposure(update(6));
        ctrl.handle_sof(6).unwrap();

        for g in 4..7 {
            assert_eq!(ctrl.get_effective_exp_params(g).unwrap().frame_id, 3);
        }
        assert_eq!(ctrl.get_effective_exp_params(7).unwrap().frame_id, 6);
    }

    #[test]
    fn test_gap_detection() {
        let (_, ctrl) = controller(ExposureDelays::default());
        ctrl.handle_sof(1).unwrap();
        ctrl.handle_sof(2).unwrap();
        ctrl.handle_sof(6).unwrap();
        assert_eq!(ctrl.sof_gaps(), 3);
    }

    #[test]
    fn test_hardware_failure_keeps_update_queued() {
        let (driver, ctrl) = controller(ExposureDelays::new(2, 2, 2));
        ctrl.prime(update(0)).unwrap();
        ctrl.set_exposure(update(1));

        driver.set_fail(true);
        let err = ctrl.handle_sof(1).unwrap_err();
        assert!(matches!(err, EngineError::HardwareIo { .. }));
        assert_eq!(ctrl.pending_len(), 1);
        assert_eq!(ctrl.get_effective_exp_params(3).unwrap().frame_id, 0);

        driver.set_fail(false);
        ctrl.handle_sof(2).unwrap();
        assert_eq!(ctrl.pending_len(), 0);
        assert_eq!(ctrl.get_effective_exp_params(4).unwrap().frame_id, 1);
    }

    #[test]
    fn test_window_bounds_effective_map() {
        let mut delays = ExposureDelays::new(0, 0, 0);
        delays.effective_window = 3;
        let (_, ctrl) = controller(delays);
        for f in 0..6 {
            ctrl.set_exposure(update(f));
            ctrl.handle_sof(f).unwrap();
        }
        // keys 0..=2 evicted, floor of 1 falls back to latest
        assert_eq!(ctrl.get_effective_exp_params(1).unwrap().frame_id, 5);
        assert_eq!(ctrl.get_effective_exp_params(3).unwrap().frame_id, 3);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (_, ctrl) = controller(ExposureDelays::default());
        ctrl.prime(update(0)).unwrap();
        ctrl.set_exposure(update(1));
        ctrl.reset();
        assert!(ctrl.get_effective_exp_params(0).is_none());
        assert_eq!(ctrl.pending_len(), 0);
        assert_eq!(ctrl.handle_sof(1).unwrap(), None);
    }
}
