//! 引擎指标。
//!
//! 自由函数写入全局 `metrics` recorder；聚合器为 CLI 保存内存汇总。

use contracts::{AlgoType, AppliedExposure, FullParams, ReadbackReport, ResultGroup};
use metrics::{counter, gauge, histogram};

/// 单次 pipeline pass 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    /// 所有算法均已执行，结果已发布
    Published,
    /// 已发布，但至少一个算法阶段失败
    Degraded,
    /// 未发布结果 (池耗尽)
    Dropped,
}

impl PassStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PassStatus::Published => "published",
            PassStatus::Degraded => "degraded",
            PassStatus::Dropped => "dropped",
        }
    }
}

/// 记录完成的 pass
pub fn record_pass(group: ResultGroup, status: PassStatus, duration_ms: f64) {
    counter!(
        "isp3a_passes_total",
        "group" => group.name(),
        "status" => status.as_str()
    )
    .increment(1);
    if status != PassStatus::Dropped {
        histogram!("isp3a_pass_duration_ms", "group" => group.name()).record(duration_ms);
    }
}

/// 记录算法阶段失败
pub fn record_algo_failure(algo: AlgoType, stage: &'static str) {
    counter!(
        "isp3a_algo_failures_total",
        "algo" => algo.name(),
        "stage" => stage
    )
    .increment(1);
}

/// 记录传感器寄存器写入
pub fn record_exposure_write(applied: &AppliedExposure) {
    counter!("isp3a_exposure_writes_total").increment(1);
    gauge!("isp3a_exposure_gain").set(f64::from(applied.gain));
    gauge!("isp3a_exposure_time_ms").set(f64::from(applied.integration_time) * 1000.0);
}

/// 记录池占用
pub fn record_pool_usage(pool: &'static str, in_use: usize, capacity: usize) {
    gauge!("isp3a_pool_in_use", "pool" => pool).set(in_use as f64);
    gauge!("isp3a_pool_capacity", "pool" => pool).set(capacity as f64);
}

/// 记录统计缓存占用
pub fn record_stats_cache_depth(cached: usize, checked_out: usize) {
    gauge!("isp3a_stats_cache_cached").set(cached as f64);
    gauge!("isp3a_stats_cache_checked_out").set(checked_out as f64);
}

/// 引擎活动的内存聚合
#[derive(Debug, Clone, Default)]
pub struct EngineMetricsAggregator {
    /// 收到的 Measurement 结果数
    pub measurement_results: u64,
    /// 收到的其他分组结果数
    pub other_results: u64,
    /// 丢弃的 pass 数
    pub dropped: u64,
    /// 寄存器写入次数
    pub exposure_writes: u64,
    /// 触发的 readback 次数
    pub readbacks: u64,
    /// 已发布曝光决策的增益
    pub gain_stats: RunningStats,
    /// 已发布曝光决策的积分时间 (ms)
    pub time_stats: RunningStats,
    /// 每次 readback 的 pass 数
    pub readback_pass_stats: RunningStats,
    /// 决策到对应寄存器写入之间的帧数
    pub write_latency_stats: RunningStats,
}

impl EngineMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一个已发布结果
    pub fn record_result(&mut self, params: &FullParams) {
        match params.group {
            ResultGroup::Measurement => self.measurement_results += 1,
            ResultGroup::Other => self.other_results += 1,
        }
        if let Some(exposure) = &params.exposure {
            self.gain_stats.push(f64::from(exposure.gain));
            self.time_stats
                .push(f64::from(exposure.integration_time) * 1000.0);
        }
    }

    /// 合并一次丢弃的 pass
    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    /// 合并一次寄存器写入
    pub fn record_write(&mut self, applied: &AppliedExposure) {
        self.exposure_writes += 1;
        self.write_latency_stats
            .push(applied.sof_frame.saturating_sub(applied.time_source) as f64);
    }

    /// 合并一次 readback
    pub fn record_readback(&mut self, report: &ReadbackReport) {
        self.readbacks += 1;
        self.readback_pass_stats.push(f64::from(report.passes));
    }

    pub fn summary(&self) -> MetricsSummary {
        let total = self.measurement_results + self.other_results + self.dropped;
        MetricsSummary {
            measurement_results: self.measurement_results,
            other_results: self.other_results,
            dropped: self.dropped,
            drop_rate: if total > 0 {
                self.dropped as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            exposure_writes: self.exposure_writes,
            readbacks: self.readbacks,
            gain: StatsSummary::from(&self.gain_stats),
            integration_time_ms: StatsSummary::from(&self.time_stats),
            readback_passes: StatsSummary::from(&self.readback_pass_stats),
            write_latency_frames: StatsSummary::from(&self.write_latency_stats),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 聚合汇总
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub measurement_results: u64,
    pub other_results: u64,
    pub dropped: u64,
    pub drop_rate: f64,
    pub exposure_writes: u64,
    pub readbacks: u64,
    pub gain: StatsSummary,
    pub integration_time_ms: StatsSummary,
    pub readback_passes: StatsSummary,
    pub write_latency_frames: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== 3A Engine Summary ===")?;
        writeln!(f, "Measurement results: {}", self.measurement_results)?;
        writeln!(f, "Other results: {}", self.other_results)?;
        writeln!(f, "Dropped passes: {} ({:.2}%)", self.dropped, self.drop_rate)?;
        writeln!(f, "Exposure writes: {}", self.exposure_writes)?;
        writeln!(f, "Readbacks: {}", self.readbacks)?;
        writeln!(f, "Gain: {}", self.gain)?;
        writeln!(f, "Integration time (ms): {}", self.integration_time_ms)?;
        writeln!(f, "Readback passes: {}", self.readback_passes)?;
        writeln!(f, "Decision-to-write latency (frames): {}", self.write_latency_frames)?;
        Ok(())
    }
}

/// Summary of a [`RunningStats`]
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线均值/方差 (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
