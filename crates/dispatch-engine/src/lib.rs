//! # Dispatch Engine
//!
//! The concurrent heart of Swarm: per-agent lifecycle state machines, FIFO
//! target queues drained by bounded worker pools, two-level cancellation
//! (queued vs in-flight), and fleet-wide fan-out with per-agent outcome
//! aggregation.
//!
//! ## Agent Value
//! - Linearizable state transitions; no operation observes a torn state
//! - FIFO start order with independent completion order across workers
//! - Graceful stop joins every worker; emergency stop fails fast and joins
//!   asynchronously
//!
//! ## Fleet Value
//! - Fan-out that never short-circuits: every agent is attempted, every
//!   outcome reported
//! - Coordinated dispatch of one logical target across all online agents

pub mod agent;
pub mod fleet;
pub mod loopback;
pub mod queue;

pub use agent::Agent;
pub use fleet::{AgentOutcome, Fleet, FleetOutcome};
pub use loopback::{LoopbackChannel, LoopbackTransport};
pub use queue::{QueuedTarget, TargetQueue};

#[cfg(test)]
pub(crate) mod test_support;
