//! Algorithm plugin contract
//!
//! Every 3A / ISP tuning algorithm is an opaque plugin behind the
//! [`Algorithm`] capability trait. The engine only knows its type, its
//! lifecycle and the records it reads and writes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{EngineResult, ExposureUpdate, FrameEvent, FullParams, SensorFlags, StatsSnapshot};

/// Number of algorithm kinds known to the engine
pub const ALGO_TYPE_COUNT: usize = 25;

/// Algorithm kind
///
/// Declaration order is the fixed registration order of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgoType {
    Ae,
    Awb,
    Af,
    Afd,
    Asd,
    Ablc,
    Adpcc,
    Amerge,
    Adrc,
    Anr,
    Alsc,
    Agic,
    Adebayer,
    Accm,
    Agamma,
    Adegamma,
    Adehaze,
    A3dlut,
    Aldch,
    Afec,
    Acsm,
    Acp,
    Aie,
    Asharp,
    Acac,
}

impl AlgoType {
    /// All types in registration order
    pub const ALL: [AlgoType; ALGO_TYPE_COUNT] = [
        AlgoType::Ae,
        AlgoType::Awb,
        AlgoType::Af,
        AlgoType::Afd,
        AlgoType::Asd,
        AlgoType::Ablc,
        AlgoType::Adpcc,
        AlgoType::Amerge,
        AlgoType::Adrc,
        AlgoType::Anr,
        AlgoType::Alsc,
        AlgoType::Agic,
        AlgoType::Adebayer,
        AlgoType::Accm,
        AlgoType::Agamma,
        AlgoType::Adegamma,
        AlgoType::Adehaze,
        AlgoType::A3dlut,
        AlgoType::Aldch,
        AlgoType::Afec,
        AlgoType::Acsm,
        AlgoType::Acp,
        AlgoType::Aie,
        AlgoType::Asharp,
        AlgoType::Acac,
    ];

    /// Dense index used by per-type tables
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Result group this type contributes to
    pub fn group(self) -> ResultGroup {
        match self {
            AlgoType::Ae | AlgoType::Awb | AlgoType::Af | AlgoType::Afd | AlgoType::Asd => {
                ResultGroup::Measurement
            }
            _ => ResultGroup::Other,
        }
    }

    /// Whether several handles may be current at once in multi mode
    pub fn supports_multi(self) -> bool {
        matches!(self, AlgoType::Ae | AlgoType::Awb | AlgoType::Af)
    }

    /// Lower-case name used in logs and metrics labels
    pub fn name(self) -> &'static str {
        match self {
            AlgoType::Ae => "ae",
            AlgoType::Awb => "awb",
            AlgoType::Af => "af",
            AlgoType::Afd => "afd",
            AlgoType::Asd => "asd",
            AlgoType::Ablc => "ablc",
            AlgoType::Adpcc => "adpcc",
            AlgoType::Amerge => "amerge",
            AlgoType::Adrc => "adrc",
            AlgoType::Anr => "anr",
            AlgoType::Alsc => "alsc",
            AlgoType::Agic => "agic",
            AlgoType::Adebayer => "adebayer",
            AlgoType::Accm => "accm",
            AlgoType::Agamma => "agamma",
            AlgoType::Adegamma => "adegamma",
            AlgoType::Adehaze => "adehaze",
            AlgoType::A3dlut => "a3dlut",
            AlgoType::Aldch => "aldch",
            AlgoType::Afec => "afec",
            AlgoType::Acsm => "acsm",
            AlgoType::Acp => "acp",
            AlgoType::Aie => "aie",
            AlgoType::Asharp => "asharp",
            AlgoType::Acac => "acac",
        }
    }
}

impl fmt::Display for AlgoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result group of a pipeline pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultGroup {
    /// 3A measurement driven algorithms
    Measurement,
    /// ISP / ISP post-processing tuning algorithms
    Other,
}

impl ResultGroup {
    /// Label used in logs and metrics
    pub fn name(self) -> &'static str {
        match self {
            ResultGroup::Measurement => "measurement",
            ResultGroup::Other => "other",
        }
    }
}

/// Opaque tuning document handed to `update_config`
pub type AlgoConfig = serde_json::Value;

/// Sensor working mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingMode {
    #[default]
    Normal,
    Hdr2,
    Hdr3,
}

impl WorkingMode {
    /// Number of simultaneously captured exposures
    pub fn exposure_count(self) -> usize {
        match self {
            WorkingMode::Normal => 1,
            WorkingMode::Hdr2 => 2,
            WorkingMode::Hdr3 => 3,
        }
    }
}

/// Input of `Algorithm::prepare`
#[derive(Debug, Clone)]
pub struct PrepareParams {
    /// Sensor working mode
    pub working_mode: WorkingMode,
    /// Derived sensor flags
    pub flags: SensorFlags,
    /// Sensor output width
    pub width: u32,
    /// Sensor output height
    pub height: u32,
    /// Opaque calibration document
    pub calibration: AlgoConfig,
}

/// Per-pass input shared by all algorithms of a pass
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    /// Frame this pass computes for
    pub frame_id: u64,
    /// Group being computed
    pub group: ResultGroup,
    /// Statistics of the frame, `None` for event driven passes
    pub stats: Option<&'a StatsSnapshot>,
    /// Hardware event that triggered the pass
    pub event: Option<&'a FrameEvent>,
    /// Exposure effective when the statistics were captured
    pub exposure: Option<&'a ExposureUpdate>,
    /// Exposure effective at the previous pass
    pub prev_exposure: Option<&'a ExposureUpdate>,
    /// Sensor flags derived at prepare time
    pub flags: SensorFlags,
    /// Sensor working mode
    pub working_mode: WorkingMode,
}

impl FrameInput<'_> {
    /// Whether statistics for `algo` are present and valid
    pub fn stats_valid(&self, algo: AlgoType) -> bool {
        self.stats.map(|s| s.is_valid(algo)).unwrap_or(false)
    }
}

/// Algorithm capability interface
///
/// Stages run in a fixed order per pass: `pre_process` on every handle of the
/// group, then `processing`, then `post_process`.
pub trait Algorithm: Send {
    /// Apply a tuning document
    fn update_config(&mut self, config: &AlgoConfig) -> EngineResult<()>;

    /// Called once per `prepare` and when the handle becomes current
    fn prepare(&mut self, params: &PrepareParams) -> EngineResult<()>;

    /// Parse statistics into algorithm-private state
    fn pre_process(&mut self, input: &FrameInput<'_>) -> EngineResult<()>;

    /// Compute results into `output`
    fn processing(&mut self, input: &FrameInput<'_>, output: &mut FullParams) -> EngineResult<()>;

    /// Finalize results after every handle of the group has processed
    fn post_process(&mut self, input: &FrameInput<'_>, output: &mut FullParams)
        -> EngineResult<()>;

    /// Opaque context, downcast by callers that know the concrete type
    fn as_any(&self) -> &dyn Any;
}

/// Factory creating a fresh algorithm context
pub type AlgoFactory = Arc<dyn Fn() -> Box<dyn Algorithm> + Send + Sync>;

/// Immutable algorithm description
#[derive(Clone)]
pub struct AlgoDescriptor {
    /// Algorithm kind
    pub algo_type: AlgoType,
    /// Human readable name
    pub name: String,
    /// Plugin version
    pub version: String,
    /// Context factory
    pub factory: AlgoFactory,
}

impl AlgoDescriptor {
    /// Create a descriptor from a factory closure
    pub fn new<F>(algo_type: AlgoType, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Algorithm> + Send + Sync + 'static,
    {
        Self {
            algo_type,
            name: name.into(),
            version: "1.0".to_string(),
            factory: Arc::new(factory),
        }
    }

    /// Set plugin version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Instantiate a new context
    pub fn create(&self) -> Box<dyn Algorithm> {
        (self.factory)()
    }
}

impl fmt::Debug for AlgoDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgoDescriptor")
            .field("algo_type", &self.algo_type)
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}
