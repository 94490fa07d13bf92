//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// isp3a - 3A statistics analysis and exposure delivery engine
#[derive(Parser, Debug)]
#[command(
    name = "isp3a",
    author,
    version,
    about = "3A analysis engine driven by a simulated sensor",
    long_about = "Runs the 3A analysis engine against a simulated sensor.\n\n\
                  Loads an engine configuration, feeds statistics, start-of-frame \n\
                  events and raw buffers through the engine and reports what the \n\
                  algorithms published and what reached the sensor."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "ISP3A_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "ISP3A_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine against a simulated sensor
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration and algorithm information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "config/example.toml", env = "ISP3A_CONFIG")]
    pub config: PathBuf,

    /// Frames to simulate
    #[arg(long, default_value = "120", env = "ISP3A_FRAMES")]
    pub frames: u64,

    /// Simulated frame rate
    #[arg(long, default_value = "30", env = "ISP3A_FPS")]
    pub fps: u32,

    /// Scene brightness multiplier (1.0 = indoor light)
    #[arg(long, default_value = "1.0")]
    pub scene_brightness: f32,

    /// Relative luma noise added per frame
    #[arg(long, default_value = "0.02")]
    pub noise: f32,

    /// Override the sensor working mode from configuration
    #[arg(long, value_enum)]
    pub working_mode: Option<ModeArg>,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "ISP3A_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config/example.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/example.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// List registered algorithm handles
    #[arg(long)]
    pub algos: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

/// Sensor working mode
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ModeArg {
    Normal,
    Hdr2,
    Hdr3,
}

impl From<ModeArg> for contracts::WorkingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Normal => contracts::WorkingMode::Normal,
            ModeArg::Hdr2 => contracts::WorkingMode::Hdr2,
            ModeArg::Hdr3 => contracts::WorkingMode::Hdr3,
        }
    }
}
