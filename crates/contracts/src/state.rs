//! Engine lifecycle state

use serde::{Deserialize, Serialize};

/// AnalyzerCore lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Invalid,
    Inited,
    Prepared,
    Started,
    Running,
    Stopped,
}

impl EngineState {
    /// Started or Running
    pub fn is_active(self) -> bool {
        matches!(self, EngineState::Started | EngineState::Running)
    }

    /// Prepared or any later state: handles have been prepared against a sensor
    pub fn is_prepared(self) -> bool {
        self >= EngineState::Prepared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!EngineState::Inited.is_prepared());
        assert!(EngineState::Prepared.is_prepared());
        assert!(EngineState::Stopped.is_prepared());
        assert!(EngineState::Running.is_active());
        assert!(!EngineState::Stopped.is_active());
    }
}
