//! Layered error definitions
//!
//! Categorized by source: state / resource / config / timeout / hardware / algorithm

use thiserror::Error;

use crate::{AlgoType, EngineState};

/// Unified error type
#[derive(Debug, Error)]
pub enum EngineError {
    // ===== Lifecycle Errors =====
    /// Operation is not valid in the current lifecycle state
    #[error("state error: '{op}' is not allowed in state {state:?}")]
    State {
        op: &'static str,
        state: EngineState,
    },

    /// Engine stopped while the caller was waiting
    #[error("engine stopped")]
    Stopped,

    // ===== Resource Errors =====
    /// Pool or queue exhausted
    #[error("resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    /// Bounded wait exceeded
    #[error("timeout: '{op}' waited {waited_ms}ms")]
    Timeout { op: &'static str, waited_ms: u64 },

    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Illegal configuration value
    #[error("config error at '{field}': {message}")]
    Config { field: String, message: String },

    /// Mode not supported by the device or algorithm type
    #[error("unsupported mode: {message}")]
    UnsupportedMode { message: String },

    // ===== Registry Errors =====
    /// No handle with this id registered for the type
    #[error("algorithm {algo:?} id {id} not found")]
    AlgoNotFound { algo: AlgoType, id: u32 },

    /// Built-in default handle cannot be removed
    #[error("algorithm {algo:?} id 0 is the built-in default and cannot be removed")]
    ProtectedAlgo { algo: AlgoType },

    /// Handle is enabled and current, it must be disabled first
    #[error("algorithm {algo:?} id {id} is in use")]
    AlgoBusy { algo: AlgoType, id: u32 },

    /// Algorithm stage failure
    #[error("algorithm {algo:?} failed: {message}")]
    Algorithm { algo: AlgoType, message: String },

    // ===== Hardware Errors =====
    /// Register write / ioctl failure
    #[error("hardware io error on '{device}': {message}")]
    HardwareIo { device: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a state mismatch error
    pub fn state(op: &'static str, state: EngineState) -> Self {
        Self::State { op, state }
    }

    /// Create a resource exhausted error
    pub fn exhausted(resource: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
        }
    }

    /// Create a configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an algorithm failure
    pub fn algorithm(algo: AlgoType, message: impl Into<String>) -> Self {
        Self::Algorithm {
            algo,
            message: message.into(),
        }
    }

    /// Create a hardware io error
    pub fn hardware(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HardwareIo {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Whether the error only concerns a single frame and the engine keeps running
    pub fn is_per_cycle(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted { .. } | Self::HardwareIo { .. } | Self::Algorithm { .. }
        )
    }
}

/// Result alias used across the workspace
pub type EngineResult<T> = std::result::Result<T, EngineError>;
