//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact 格式，带工作线程名)
//! - Prometheus 指标导出
//! - Pass / 曝光 / 池占用指标与内存聚合
//!
//! ## 使用示例
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig::default().with_verbosity(1, false))?;
//!
//! let started = Instant::now();
//! // ... 执行一次 pass ...
//! observability::record_pass(ResultGroup::Measurement, PassStatus::Published, elapsed_ms);
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::metrics::{
    record_algo_failure, record_exposure_write, record_pass, record_pool_usage,
    record_stats_cache_depth, EngineMetricsAggregator, MetricsSummary, PassStatus, RunningStats,
    StatsSummary,
};

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// 未设置 RUST_LOG 时使用的日志级别
    pub level: Level,
    /// 忽略 RUST_LOG，固定使用 `level`
    pub force_level: bool,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            level: Level::INFO,
            force_level: false,
            metrics_port: None,
        }
    }
}

impl ObservabilityConfig {
    /// 将 `-v` 次数与 quiet 标志映射为默认级别
    ///
    /// quiet 优先，固定为 `WARN`，不受 RUST_LOG 影响。
    pub fn with_verbosity(mut self, verbose: u8, quiet: bool) -> Self {
        if quiet {
            self.level = Level::WARN;
            self.force_level = true;
            return self;
        }
        self.level = match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback =
            || EnvFilter::default().add_directive(LevelFilter::from_level(self.level).into());
        if self.force_level {
            return fallback();
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback())
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// 结构化 JSON 行
    #[default]
    Json,
    /// 多行可读格式
    Pretty,
    /// 单行可读格式
    Compact,
}

/// 安装 tracing subscriber；设置端口时同时安装 Prometheus exporter
///
/// # Errors
/// 全局 subscriber 或 recorder 已存在时返回错误
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    // 工作线程命名为 isp3a-*，所有格式都保留线程名
    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_thread_names(true))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_thread_names(true))
            .try_init(),
    };
    installed.context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        install_prometheus(port)?;
    }

    tracing::debug!(
        log_format = ?config.log_format,
        level = %config.level,
        metrics_port = ?config.metrics_port,
        "observability initialized"
    );
    Ok(())
}

/// 仅安装 Prometheus exporter (tracing subscriber 由宿主负责)
pub fn init_metrics_only(port: u16) -> Result<()> {
    install_prometheus(port)
}

fn install_prometheus(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;
    tracing::info!(port, "prometheus metrics endpoint initialized");
    Ok(())
}
