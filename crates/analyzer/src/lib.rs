//! # Analyzer
//!
//! The 3A analysis engine: algorithm registry, per-frame pipeline passes and
//! the worker threads feeding them.
//!
//! ## Data Flow
//! ```text
//! push_stats ──▶ isp3a-stats  ──▶ analyze ──────────┐
//! push_event ──▶ isp3a-events ──▶ handle_sof        ├──▶ FullParams ──▶ callback
//!                                 analyze_events ───┘
//! push_raw   ──▶ isp3a-raw    ──▶ StreamAligner ──▶ analyze_raw
//! ```
//!
//! Each pass takes one [`FullParams`](contracts::FullParams) record from a
//! fixed pool. A pass that finds the pool empty is dropped and reported as
//! `ResourceExhausted`; the next frame starts clean.

mod algorithms;
mod aux_light;
mod engine;
mod gate;
mod pipeline;
mod registry;
mod workers;

pub use algorithms::{builtin_descriptor, BuiltinAlgorithm, MockAlgorithm, MockCall, MockProbe};
pub use aux_light::AuxLightController;
pub use engine::{AnalyzerBuilder, AnalyzerCore, ResultCallback};
pub use gate::PassGate;
pub use pipeline::{run_stages, StageOutcome};
pub use registry::{AlgoContext, AlgoRegistry, ActiveHandle, HandleInfo, DEFAULT_ALGO_ID};
pub use workers::{RawJob, WorkerThreads};
