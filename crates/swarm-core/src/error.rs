//! Error types for the Swarm platform

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwarmError>;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Transport connection failed: {reason}")]
    Connection { reason: String },

    #[error("Transport I/O failed: {reason}")]
    Io { reason: String },

    #[error("Operation '{operation}' rejected in state {state}")]
    Rejected { operation: String, state: String },

    #[error("Payload not found: {payload_id}")]
    PayloadNotFound { payload_id: String },

    #[error("Agent not found: {name}")]
    AgentNotFound { name: String },

    #[error("Invalid agent config: {reason}")]
    InvalidConfig { reason: String },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl SwarmError {
    pub fn rejected(operation: impl Into<String>, state: impl ToString) -> Self {
        Self::Rejected {
            operation: operation.into(),
            state: state.to_string(),
        }
    }
}
