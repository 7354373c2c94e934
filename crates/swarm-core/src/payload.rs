//! Payload execution contract

use crate::target::{CancelToken, Target};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of one payload burst against a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadOutcome {
    pub iterations_attempted: u64,
    pub iterations_succeeded: u64,
}

impl PayloadOutcome {
    pub fn iterations_failed(&self) -> u64 {
        self.iterations_attempted - self.iterations_succeeded
    }
}

/// A pluggable unit of work executed repeatedly against a target.
///
/// Implementations must poll the cancellation token between iterations and
/// return promptly (within one iteration's latency) once it is set, and must
/// not share mutable state across concurrent invocations.
#[async_trait]
pub trait Payload: std::fmt::Debug + Send + Sync {
    /// Stable identifier used for registry lookup.
    fn id(&self) -> &str;

    /// Run one burst against the target.
    async fn run(&self, target: &Target, cancel: &CancelToken) -> PayloadOutcome;
}

/// Maps payload identifiers to executable payloads.
///
/// The engine looks a payload up once per accepted dispatch and treats the
/// result polymorphically; it never branches on the identifier itself.
pub trait PayloadResolver: Send + Sync {
    fn resolve(&self, payload_id: &str) -> Option<Arc<dyn Payload>>;
}
