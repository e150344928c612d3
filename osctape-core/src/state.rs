//! Engine state shared by playback and recording.

use serde::{Deserialize, Serialize};

/// Lifecycle of one engine. Each engine moves between these two states
/// independently of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
}

impl EngineState {
    pub fn is_running(&self) -> bool {
        *self == EngineState::Running
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
        }
    }
}
