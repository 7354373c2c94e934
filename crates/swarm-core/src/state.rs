//! Agent lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single agent. Exactly one agent owns its state at a
/// time; transitions are serialized through the agent's internal lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Offline,
    Online,
    Maintenance,
    Dispatching,
    Failed,
}

impl AgentState {
    /// True while the agent holds a transport connection and live workers.
    pub fn is_up(&self) -> bool {
        matches!(
            self,
            AgentState::Online | AgentState::Dispatching | AgentState::Maintenance
        )
    }

    /// States in which new targets are accepted onto the queue.
    pub fn accepts_dispatch(&self) -> bool {
        matches!(self, AgentState::Online | AgentState::Dispatching)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Offline => "offline",
            AgentState::Online => "online",
            AgentState::Maintenance => "maintenance",
            AgentState::Dispatching => "dispatching",
            AgentState::Failed => "failed",
        };
        f.write_str(s)
    }
}
