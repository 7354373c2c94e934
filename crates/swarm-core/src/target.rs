//! Dispatch targets and cancellation tokens

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identifier assigned to every accepted dispatch, for log and report
/// correlation.
pub type DispatchId = Uuid;

/// Shared, monotonic, set-once-to-true cancellation flag.
///
/// Clones share the same underlying flag. The flag is never reset: once
/// `cancel` has been called the token stays cancelled for every holder.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns true only for the call that performed the
    /// false-to-true transition, so the edge is observable exactly once.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One unit of dispatched work.
///
/// Consumed by exactly one worker; the cancellation token may be read by any
/// holder of a clone. `duration` bounds how long a worker keeps re-running
/// the payload against the target; zero means a single burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Destination address, opaque to the engine (typically "host:port").
    pub address: String,
    /// Registry identifier of the payload to execute.
    pub payload_id: String,
    /// Scales the payload's iteration count.
    pub intensity: u32,
    /// Wall-clock bound on execution.
    pub duration: Duration,
    // Tokens do not travel on the wire; a deserialized target gets a fresh one.
    #[serde(skip, default)]
    cancel: CancelToken,
}

impl Target {
    pub fn new(
        address: impl Into<String>,
        payload_id: impl Into<String>,
        intensity: u32,
        duration: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            payload_id: payload_id.into(),
            intensity,
            duration,
            cancel: CancelToken::new(),
        }
    }

    /// Handle to this target's cancellation flag, shared with all clones.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
