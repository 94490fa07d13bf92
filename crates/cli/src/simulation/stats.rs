//! Simulation statistics.

use std::time::Duration;

use contracts::AppliedExposure;
use observability::MetricsSummary;
use stream_aligner::AlignerStats;

/// Statistics from a simulation run
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    /// Frames driven
    pub frames: u64,

    /// Frames whose statistics were not produced for lack of a free record
    pub stats_skipped: u64,

    /// Snapshots taken out of the stats cache by the consumer
    pub stats_consumed: u64,

    /// Pipeline passes since prepare
    pub passes: u64,

    /// Total duration of the run
    pub duration: Duration,

    /// Engine activity
    pub engine: MetricsSummary,

    /// Raw stream alignment
    pub aligner: Option<AlignerStats>,

    /// Last register write reaching the sensor
    pub last_write: Option<AppliedExposure>,
}

impl SimulationStats {
    /// Frames per second actually driven
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Simulation Statistics                     ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Frames: {}", self.frames);
        println!("   ├─ FPS: {:.2}", self.fps());
        println!("   ├─ Passes: {}", self.passes);
        println!("   ├─ Stats skipped: {}", self.stats_skipped);
        println!("   └─ Stats consumed: {}", self.stats_consumed);

        let e = &self.engine;
        println!("\n📈 Engine");
        println!("   ├─ Measurement results: {}", e.measurement_results);
        println!("   ├─ Other results: {}", e.other_results);
        println!("   ├─ Dropped passes: {} ({:.2}%)", e.dropped, e.drop_rate);
        println!("   ├─ Exposure writes: {}", e.exposure_writes);
        println!("   ├─ Gain: {}", e.gain);
        println!("   ├─ Integration time (ms): {}", e.integration_time_ms);
        println!("   └─ Decision-to-write latency (frames): {}", e.write_latency_frames);

        if let Some(aligner) = &self.aligner {
            println!("\n🎞  Raw Alignment");
            println!("   ├─ Delivered: {}", aligner.delivered);
            println!("   ├─ Skipped: {}", aligner.skipped);
            println!("   ├─ Failed: {}", aligner.failed);
            println!("   └─ Stale: {}", aligner.stale);
        }

        if let Some(write) = &self.last_write {
            println!("\n🔧 Sensor");
            println!("   ├─ Last write on frame: {}", write.sof_frame);
            println!("   ├─ Gain: {:.3}", write.gain);
            println!(
                "   └─ Integration time: {:.3}ms",
                write.integration_time * 1000.0
            );
        }

        println!();
    }
}
