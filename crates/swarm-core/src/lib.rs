//! # Swarm Core
//!
//! Core types and traits for the Swarm agent-fleet dispatch platform.
//!
//! ## Swarm Agent Value
//! - Bounded worker pools draining a shared FIFO queue for predictable dispatch latency
//! - Set-once cancellation tokens with observable false-to-true edges
//! - Loss-free statistics counters safe under concurrent worker updates
//!
//! ## Swarm Fleet Value
//! - Centralized fan-out of lifecycle and dispatch operations
//! - Per-agent outcome reporting with no short-circuit on partial failure
//! - Pluggable payload registry and injected agent rosters

pub mod config;
pub mod error;
pub mod payload;
pub mod state;
pub mod target;
pub mod transport;

pub use config::{default_roster, AgentConfig, ConfigSource, StaticConfigSource};
pub use error::{Result, SwarmError};
pub use payload::{Payload, PayloadOutcome, PayloadResolver};
pub use state::AgentState;
pub use target::{CancelToken, DispatchId, Target};
pub use transport::{Connection, ControlFrame, Endpoint, Transport};

/// Current Swarm version for compatibility checks
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Swarm build information for telemetry and debugging
pub const BUILD_INFO: &str = concat!(
    "Swarm ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);

/// Standard API endpoints for Swarm services
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const METRICS: &str = "/metrics";
    pub const API_V1_AGENTS: &str = "/api/v1/agents";
    pub const API_V1_DISPATCH: &str = "/api/v1/dispatch";
    pub const API_V1_REPORT: &str = "/api/v1/report";
}
