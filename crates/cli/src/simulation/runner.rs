//! Simulation runner - wires the engine to mock hardware and drives frames.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use analyzer::AnalyzerCore;
use anyhow::{Context, Result};
use bytes::Bytes;
use contracts::{
    AlgoType, EngineBlueprint, EngineError, FrameEvent, RawBuffer, StatsKind, WorkingMode,
};
use exposure_sync::{ExposureSyncController, MockSensorDriver};
use observability::EngineMetricsAggregator;
use stream_aligner::{MockReadbackDevice, StreamAligner};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Scene, SimulationStats};

/// Statistics blocks the simulated hardware produces per kind
const MEASUREMENT_BLOCKS: [AlgoType; 3] = [AlgoType::Ae, AlgoType::Awb, AlgoType::Af];
const POST_BLOCKS: [AlgoType; 3] = [AlgoType::Adrc, AlgoType::Adehaze, AlgoType::Alsc];

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub blueprint: EngineBlueprint,

    /// Frames to drive
    pub frames: u64,

    /// Frame rate of the simulated sensor
    pub fps: u32,

    /// Scene brightness multiplier
    pub brightness: f32,

    /// Relative luma noise
    pub noise: f32,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Simulated sensor, ISP and tuning consumer around one engine
pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run the simulation to completion
    pub async fn run(self) -> Result<SimulationStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;
        let mode = blueprint.engine.working_mode;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let driver = Arc::new(MockSensorDriver::new(blueprint.sensor.name.clone()));
        let sync = Arc::new(
            ExposureSyncController::new(driver.clone(), blueprint.exposure)
                .context("Invalid exposure delays")?,
        );
        let device = Arc::new(MockReadbackDevice::new());
        let aligner = StreamAligner::new(blueprint.aligner.clone(), mode, device);

        let aggregator = Arc::new(Mutex::new(EngineMetricsAggregator::new()));
        let core = {
            let aggregator = aggregator.clone();
            AnalyzerCore::builder(blueprint.engine.clone())
                .with_exposure_sync(sync)
                .with_stream_aligner(aligner)
                .on_result(move |item| {
                    aggregator
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .record_result(&item.read());
                })
                .build()
        };

        core.init().context("Failed to initialize engine")?;
        if let Err(e) = core.set_aux_light_config(blueprint.aux_light) {
            warn!(error = %e, "aux light configuration rejected, light stays off");
        }
        core.prepare(&blueprint.sensor, mode)
            .context("Failed to prepare engine")?;
        core.start().context("Failed to start engine")?;

        info!(
            sensor = %blueprint.sensor.name,
            ?mode,
            frames = self.config.frames,
            fps = self.config.fps,
            "Simulation running"
        );

        let consumer = spawn_stats_consumer(core.clone());
        let mut scene = Scene::new(self.config.brightness, self.config.noise, 0x3a);
        let period = Duration::from_secs_f64(1.0 / f64::from(self.config.fps.max(1)));
        let mut ticker = tokio::time::interval(period);
        let mut stats = SimulationStats::default();

        for frame in 1..=self.config.frames {
            ticker.tick().await;
            let timestamp_ns = start_time.elapsed().as_nanos() as u64;
            drive_frame(&core, &mut scene, mode, frame, timestamp_ns, &mut stats)?;
            stats.frames += 1;
        }

        // let the workers drain the last frame
        tokio::time::sleep(period * 2).await;

        info!("Stopping engine...");
        stats.passes = core.pass_count();
        stats.aligner = core.aligner_stats();
        core.stop().context("Failed to stop engine")?;
        stats.stats_consumed = consumer.await.unwrap_or_else(|e| {
            warn!(error = %e, "stats consumer task failed");
            0
        });

        let writes = driver.writes();
        let mut aggregator = aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for write in &writes {
            aggregator.record_write(write);
        }
        stats.engine = aggregator.summary();
        stats.last_write = writes.last().copied();
        stats.duration = start_time.elapsed();

        core.deinit().context("Failed to release engine")?;
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Simulation complete"
        );
        Ok(stats)
    }
}

/// Feed one frame: start of frame, both statistics kinds, raw buffers
fn drive_frame(
    core: &AnalyzerCore,
    scene: &mut Scene,
    mode: WorkingMode,
    frame: u64,
    timestamp_ns: u64,
    stats: &mut SimulationStats,
) -> Result<()> {
    core.push_event(FrameEvent::sof(frame, timestamp_ns))?;

    let exposure = core.get_effective_exp_params(frame);
    let luma = scene.mean_luma(exposure.as_ref());
    let payload = Bytes::copy_from_slice(&luma.to_le_bytes());

    for (kind, blocks) in [
        (StatsKind::Measurement, MEASUREMENT_BLOCKS),
        (StatsKind::Post, POST_BLOCKS),
    ] {
        let item = match core.alloc_stats() {
            Ok(item) => item,
            Err(e) => {
                warn!(frame_id = frame, ?kind, error = %e, "no free stats record, skipping");
                stats.stats_skipped += 1;
                continue;
            }
        };
        {
            let mut snapshot = item.write();
            snapshot.frame_id = frame;
            snapshot.kind = kind;
            snapshot.mean_luma = luma;
            for algo in blocks {
                snapshot.set_block(algo, payload.clone());
            }
        }
        core.push_stats(item)?;
    }

    for channel in 0..mode.exposure_count() {
        let descriptor = (frame % 64) as u32 * 4 + channel as u32;
        core.push_raw_buffer(RawBuffer::new(channel, frame, descriptor), exposure)?;
    }

    debug!(frame_id = frame, luma, "frame driven");
    Ok(())
}

/// Tuning-tool stand-in: drains the stats cache until the engine stops
fn spawn_stats_consumer(core: Arc<AnalyzerCore>) -> JoinHandle<u64> {
    tokio::task::spawn_blocking(move || {
        let mut consumed = 0;
        loop {
            match core.acquire_stats(Some(Duration::from_millis(200))) {
                Ok(handle) => {
                    consumed += 1;
                    core.release_stats(handle);
                }
                Err(EngineError::Timeout { .. }) => continue,
                Err(EngineError::Stopped) => break,
                Err(e) => {
                    warn!(error = %e, "stats consumer stopped");
                    break;
                }
            }
        }
        consumed
    })
}

#[cfg(test)]
mod tests {
    use contracts::{AlgoConfig, GrayMode, PixelFormat, SensorDescriptor};

    use super::*;

    fn blueprint() -> EngineBlueprint {
        EngineBlueprint {
            version: Default::default(),
            sensor: SensorDescriptor {
                name: "sim".into(),
                pixel_format: PixelFormat::BayerRggb10,
                width: 1280,
                height: 720,
                gray_mode: GrayMode::Auto,
                calibration: AlgoConfig::Null,
            },
            engine: Default::default(),
            exposure: Default::default(),
            aligner: Default::default(),
            aux_light: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_simulation_runs_every_frame() {
        let stats = Simulation::new(SimulationConfig {
            blueprint: blueprint(),
            frames: 20,
            fps: 200,
            brightness: 1.0,
            noise: 0.0,
            metrics_port: None,
        })
        .run()
        .await
        .unwrap();

        assert_eq!(stats.frames, 20);
        assert!(stats.engine.measurement_results >= 1);
        assert!(stats.engine.exposure_writes >= 1);
        assert!(stats.last_write.is_some());
        assert!(stats.aligner.is_some());
    }
}
