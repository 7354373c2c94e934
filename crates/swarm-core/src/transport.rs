//! Transport collaborator interface and control frames
//!
//! The engine owns no sockets. Agents acquire a [`Connection`] through a
//! [`Transport`] during initialization and release it on stop; everything in
//! between is opportunistic send/receive whose failures are logged, never
//! fatal to agent state.

use crate::error::Result;
use crate::target::Target;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network endpoint an agent connects to. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An established control-plane connection.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Poll for an inbound frame. `None` means nothing is pending.
    async fn receive(&self) -> Result<Option<Vec<u8>>>;

    async fn close(&self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>>;
}

/// Control-plane message exchanged between an agent and its coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Heartbeat { agent: String, timestamp_ms: i64 },
    StatusRequest,
    Status { agent: String, body: serde_json::Value },
    Dispatch { target: Target },
    Stop,
    EmergencyStop,
    Restart,
}

impl ControlFrame {
    pub fn heartbeat(agent: impl Into<String>) -> Self {
        Self::Heartbeat {
            agent: agent.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn status(agent: impl Into<String>, body: &impl Serialize) -> Result<Self> {
        Ok(Self::Status {
            agent: agent.into(),
            body: serde_json::to_value(body)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
