//! Built-in and mock algorithm plugins.
//!
//! The built-in handles (id 0) keep the pipeline producing sane register
//! values without any tuning plugin loaded. [`MockAlgorithm`] records every
//! lifecycle call for tests and the CLI simulation.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    AlgoConfig, AlgoDescriptor, AlgoType, Algorithm, ChannelExposure, EngineError, EngineResult,
    ExposureUpdate, FocusParams, FrameInput, FullParams, PrepareParams, ResultGroup, WorkingMode,
};

const DEFAULT_GAIN: f32 = 1.0;
const DEFAULT_TIME: f32 = 0.01;
const MIN_TIME: f32 = 1.0e-4;
const MAX_TIME: f32 = 1.0 / 30.0;
const MAX_GAIN: f32 = 16.0;
const DEFAULT_TARGET_LUMA: f32 = 50.0;
/// Per-frame exposure step is bounded to [1/2, 2]
const MAX_STEP: f32 = 2.0;
/// Exposure ratio between neighbouring HDR channels
const HDR_CHANNEL_RATIO: f32 = 4.0;

/// Descriptor of the built-in handle of `algo`
pub fn builtin_descriptor(algo: AlgoType) -> AlgoDescriptor {
    AlgoDescriptor::new(algo, format!("builtin-{}", algo.name()), move || {
        Box::new(BuiltinAlgorithm::new(algo))
    })
}

/// Built-in algorithm
///
/// AE runs a bounded proportional loop on the mean luma, AF parks the lens
/// and every ISP module publishes its tuning document as register table.
#[derive(Debug)]
pub struct BuiltinAlgorithm {
    algo: AlgoType,
    target_luma: f32,
    table: Bytes,
    working_mode: WorkingMode,
    measured_luma: Option<f32>,
}

impl BuiltinAlgorithm {
    pub fn new(algo: AlgoType) -> Self {
        Self {
            algo,
            target_luma: DEFAULT_TARGET_LUMA,
            table: Bytes::new(),
            working_mode: WorkingMode::Normal,
            measured_luma: None,
        }
    }

    /// Mean luma the AE loop converges to
    pub fn target_luma(&self) -> f32 {
        self.target_luma
    }

    fn next_exposure(&self, input: &FrameInput<'_>) -> ExposureUpdate {
        let base = input
            .exposure
            .copied()
            .unwrap_or_else(|| ExposureUpdate::linear(input.frame_id, DEFAULT_GAIN, DEFAULT_TIME));

        let sensitivity = match self.measured_luma.filter(|l| *l > 0.0) {
            Some(luma) => {
                let step = (self.target_luma / luma).clamp(1.0 / MAX_STEP, MAX_STEP);
                base.sensitivity() * step
            }
            None => base.sensitivity(),
        };

        let (gain, time) = if sensitivity <= MAX_TIME {
            (DEFAULT_GAIN, sensitivity.max(MIN_TIME))
        } else {
            ((sensitivity / MAX_TIME).min(MAX_GAIN), MAX_TIME)
        };

        let channels = self.working_mode.exposure_count();
        if channels > 1 {
            let hdr: Vec<ChannelExposure> = (0..channels)
                .map(|i| ChannelExposure {
                    gain,
                    integration_time: (time / HDR_CHANNEL_RATIO.powi(i as i32)).max(MIN_TIME),
                })
                .collect();
            ExposureUpdate::hdr(input.frame_id, &hdr)
        } else {
            ExposureUpdate::linear(input.frame_id, gain, time)
        }
    }
}

impl Algorithm for BuiltinAlgorithm {
    fn update_config(&mut self, config: &AlgoConfig) -> EngineResult<()> {
        if let Some(target) = config.get("target_luma").and_then(AlgoConfig::as_f64) {
            if !(1.0..=255.0).contains(&target) {
                return Err(EngineError::algorithm(
                    self.algo,
                    format!("target_luma {target} out of range 1..=255"),
                ));
            }
            self.target_luma = target as f32;
        }
        let table =
            serde_json::to_vec(config).map_err(|e| EngineError::algorithm(self.algo, e.to_string()))?;
        self.table = Bytes::from(table);
        Ok(())
    }

    fn prepare(&mut self, params: &PrepareParams) -> EngineResult<()> {
        self.working_mode = params.working_mode;
        self.measured_luma = None;
        match params.calibration.get(self.algo.name()) {
            Some(doc) => self.update_config(doc),
            None => Ok(()),
        }
    }

    fn pre_process(&mut self, input: &FrameInput<'_>) -> EngineResult<()> {
        if self.algo == AlgoType::Ae {
            self.measured_luma = input
                .stats
                .filter(|s| s.is_valid(AlgoType::Ae))
                .map(|s| s.mean_luma);
        }
        Ok(())
    }

    fn processing(&mut self, input: &FrameInput<'_>, output: &mut FullParams) -> EngineResult<()> {
        match self.algo {
            AlgoType::Ae => output.set_exposure(self.next_exposure(input)),
            AlgoType::Af => output.set_focus(FocusParams::default()),
            algo if algo.group() == ResultGroup::Other => {
                output.set_module(algo, self.table.clone())
            }
            _ => {}
        }
        Ok(())
    }

    fn post_process(
        &mut self,
        _input: &FrameInput<'_>,
        _output: &mut FullParams,
    ) -> EngineResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One recorded lifecycle call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub label: String,
    pub algo: AlgoType,
    pub stage: &'static str,
    pub frame_id: u64,
}

#[derive(Debug, Default)]
struct ProbeState {
    calls: Mutex<Vec<MockCall>>,
    fail: Mutex<Vec<(String, &'static str)>>,
    stall: Mutex<Option<(String, Duration)>>,
    seen_exposures: Mutex<Vec<Option<u64>>>,
    instances: AtomicU64,
}

/// Shared recorder behind every [`MockAlgorithm`] created from it
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    state: Arc<ProbeState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `stage` of the mock labelled `label` fail
    pub fn fail_on(&self, label: &str, stage: &'static str) {
        lock(&self.state.fail).push((label.to_string(), stage));
    }

    /// Clear injected failures
    pub fn clear_failures(&self) {
        lock(&self.state.fail).clear();
    }

    /// Make `processing` of the mock labelled `label` sleep
    pub fn stall(&self, label: &str, duration: Duration) {
        *lock(&self.state.stall) = Some((label.to_string(), duration));
    }

    /// Every call so far
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state.calls).clone()
    }

    /// Stages called on the mock labelled `label`, in order
    pub fn stages(&self, label: &str) -> Vec<&'static str> {
        lock(&self.state.calls)
            .iter()
            .filter(|c| c.label == label)
            .map(|c| c.stage)
            .collect()
    }

    /// Number of calls to `stage` across every mock
    pub fn count(&self, stage: &str) -> usize {
        lock(&self.state.calls)
            .iter()
            .filter(|c| c.stage == stage)
            .count()
    }

    /// Frame ids of the effective exposure handed to `pre_process`
    pub fn seen_exposures(&self) -> Vec<Option<u64>> {
        lock(&self.state.seen_exposures).clone()
    }

    /// Contexts created from descriptors bound to this probe
    pub fn instances(&self) -> u64 {
        self.state.instances.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        lock(&self.state.calls).clear();
        lock(&self.state.seen_exposures).clear();
    }

    fn record(&self, label: &str, algo: AlgoType, stage: &'static str, frame_id: u64) -> EngineResult<()> {
        lock(&self.state.calls).push(MockCall {
            label: label.to_string(),
            algo,
            stage,
            frame_id,
        });
        let failing = lock(&self.state.fail)
            .iter()
            .any(|(l, s)| l == label && *s == stage);
        if failing {
            return Err(EngineError::algorithm(
                algo,
                format!("{label}: injected {stage} failure"),
            ));
        }
        Ok(())
    }

    fn stall_for(&self, label: &str) -> Option<Duration> {
        lock(&self.state.stall)
            .as_ref()
            .filter(|(l, _)| l == label)
            .map(|(_, d)| *d)
    }
}

/// Recording algorithm
///
/// AE mocks publish a fixed exposure for the frame they process.
#[derive(Debug)]
pub struct MockAlgorithm {
    algo: AlgoType,
    label: String,
    probe: MockProbe,
    config: Option<AlgoConfig>,
}

impl MockAlgorithm {
    pub fn new(algo: AlgoType, label: impl Into<String>, probe: MockProbe) -> Self {
        Self {
            algo,
            label: label.into(),
            probe,
            config: None,
        }
    }

    /// Descriptor creating mocks bound to `probe`
    pub fn descriptor(algo: AlgoType, label: impl Into<String>, probe: &MockProbe) -> AlgoDescriptor {
        let label = label.into();
        let probe = probe.clone();
        AlgoDescriptor::new(algo, label.clone(), move || {
            probe.state.instances.fetch_add(1, Ordering::SeqCst);
            Box::new(MockAlgorithm::new(algo, label.clone(), probe.clone()))
        })
        .with_version("mock")
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Last document passed to `update_config`
    pub fn config(&self) -> Option<&AlgoConfig> {
        self.config.as_ref()
    }
}

impl Algorithm for MockAlgorithm {
    fn update_config(&mut self, config: &AlgoConfig) -> EngineResult<()> {
        self.probe.record(&self.label, self.algo, "update_config", 0)?;
        self.config = Some(config.clone());
        Ok(())
    }

    fn prepare(&mut self, _params: &PrepareParams) -> EngineResult<()> {
        self.probe.record(&self.label, self.algo, "prepare", 0)
    }

    fn pre_process(&mut self, input: &FrameInput<'_>) -> EngineResult<()> {
        lock(&self.probe.state.seen_exposures).push(input.exposure.map(|e| e.frame_id));
        self.probe
            .record(&self.label, self.algo, "pre_process", input.frame_id)
    }

    fn processing(&mut self, input: &FrameInput<'_>, output: &mut FullParams) -> EngineResult<()> {
        if let Some(stall) = self.probe.stall_for(&self.label) {
            std::thread::sleep(stall);
        }
        self.probe
            .record(&self.label, self.algo, "processing", input.frame_id)?;
        if self.algo == AlgoType::Ae {
            output.set_exposure(ExposureUpdate::linear(input.frame_id, 2.0, 0.01));
        }
        Ok(())
    }

    fn post_process(&mut self, input: &FrameInput<'_>, _output: &mut FullParams) -> EngineResult<()> {
        self.probe
            .record(&self.label, self.algo, "post_process", input.frame_id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ParamSlot, SensorFlags, StatsSnapshot};

    fn input<'a>(
        stats: Option<&'a StatsSnapshot>,
        exposure: Option<&'a ExposureUpdate>,
    ) -> FrameInput<'a> {
        FrameInput {
            frame_id: 7,
            group: ResultGroup::Measurement,
            stats,
            event: None,
            exposure,
            prev_exposure: None,
            flags: SensorFlags::default(),
            working_mode: WorkingMode::Normal,
        }
    }

    fn run_ae(ae: &mut BuiltinAlgorithm, input: &FrameInput<'_>) -> ExposureUpdate {
        let mut out = FullParams::default();
        ae.pre_process(input).unwrap();
        ae.processing(input, &mut out).unwrap();
        out.exposure.unwrap()
    }

    #[test]
    fn test_builtin_ae_defaults_without_stats() {
        let mut ae = BuiltinAlgorithm::new(AlgoType::Ae);
        let update = run_ae(&mut ae, &input(None, None));
        assert_eq!(update.frame_id, 7);
        assert_eq!(update.gain, DEFAULT_GAIN);
        assert_eq!(update.integration_time, DEFAULT_TIME);
    }

    #[test]
    fn test_builtin_ae_steps_toward_target() {
        let mut ae = BuiltinAlgorithm::new(AlgoType::Ae);
        let base = ExposureUpdate::linear(3, 1.0, 0.01);
        let mut stats = StatsSnapshot::default();
        stats.set_block(AlgoType::Ae, Bytes::new());

        stats.mean_luma = 25.0;
        let brighter = run_ae(&mut ae, &input(Some(&stats), Some(&base)));
        assert!((brighter.sensitivity() - 0.02).abs() < 1e-6);

        // step bounded to one half
        stats.mean_luma = 250.0;
        let darker = run_ae(&mut ae, &input(Some(&stats), Some(&base)));
        assert!((darker.sensitivity() - 0.005).abs() < 1e-6);

        // long exposures move into gain
        let bright = ExposureUpdate::linear(3, 1.0, MAX_TIME);
        stats.mean_luma = 10.0;
        let gained = run_ae(&mut ae, &input(Some(&stats), Some(&bright)));
        assert_eq!(gained.integration_time, MAX_TIME);
        assert!((gained.gain - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_builtin_config_from_calibration() {
        let mut ae = BuiltinAlgorithm::new(AlgoType::Ae);
        let params = PrepareParams {
            working_mode: WorkingMode::Hdr2,
            flags: SensorFlags::default(),
            width: 1920,
            height: 1080,
            calibration: serde_json::json!({ "ae": { "target_luma": 80.0 } }),
        };
        ae.prepare(&params).unwrap();
        assert_eq!(ae.target_luma(), 80.0);

        let update = run_ae(&mut ae, &input(None, None));
        assert_eq!(update.channel_count, 2);
        assert!(update.channels[1].integration_time < update.channels[0].integration_time);

        let bad = serde_json::json!({ "target_luma": 0.0 });
        assert!(ae.update_config(&bad).is_err());
    }

    #[test]
    fn test_builtin_module_publishes_table() {
        let mut nr = BuiltinAlgorithm::new(AlgoType::Anr);
        nr.update_config(&serde_json::json!({ "strength": 3 })).unwrap();
        let mut out = FullParams::default();
        nr.processing(&input(None, None), &mut out).unwrap();
        assert!(out.update_mask.contains(ParamSlot::IspPost));
        assert!(!out.module(AlgoType::Anr).unwrap().is_empty());
    }

    #[test]
    fn test_mock_records_and_fails() {
        let probe = MockProbe::new();
        let descriptor = MockAlgorithm::descriptor(AlgoType::Awb, "m", &probe);
        let mut algo = descriptor.create();
        assert_eq!(probe.instances(), 1);

        probe.fail_on("m", "processing");
        let stats = StatsSnapshot::default();
        let input = input(Some(&stats), None);
        let mut out = FullParams::default();
        algo.pre_process(&input).unwrap();
        assert!(algo.processing(&input, &mut out).is_err());
        assert_eq!(probe.stages("m"), vec!["pre_process", "processing"]);
        assert_eq!(probe.seen_exposures(), vec![None]);

        let mock = algo.as_any().downcast_ref::<MockAlgorithm>().unwrap();
        assert_eq!(mock.label(), "m");
    }
}
