//! Payload registry implementation
//!
//! Built on lock-free lookups so worker pools resolve payloads without
//! contending with registration.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use swarm_core::{Payload, PayloadResolver, Result, SwarmError};
use tracing::{info, instrument};

/// Maps payload identifiers to payloads, with an optional fallback used for
/// identifiers nothing was registered under.
pub struct PayloadRegistry {
    payloads: DashMap<String, Arc<dyn Payload>>,
    fallback: RwLock<Option<Arc<dyn Payload>>>,
}

impl std::fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("payload_count", &self.payloads.len())
            .field("has_fallback", &self.fallback.read().is_some())
            .finish()
    }
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self {
            payloads: DashMap::new(),
            fallback: RwLock::new(None),
        }
    }

    /// Register a payload under its own identifier. Replaces any previous
    /// payload with the same identifier atomically.
    #[instrument(skip(self, payload), fields(payload_id = %payload.id()))]
    pub fn register(&self, payload: Arc<dyn Payload>) {
        let id = payload.id().to_string();
        self.payloads.insert(id.clone(), payload);
        info!("payload '{}' registered", id);
    }

    #[instrument(skip(self))]
    pub fn remove(&self, payload_id: &str) -> Result<Arc<dyn Payload>> {
        let (_, payload) =
            self.payloads
                .remove(payload_id)
                .ok_or_else(|| SwarmError::PayloadNotFound {
                    payload_id: payload_id.to_string(),
                })?;
        info!("payload '{}' removed", payload_id);
        Ok(payload)
    }

    /// Exact lookup, no fallback.
    pub fn get(&self, payload_id: &str) -> Option<Arc<dyn Payload>> {
        self.payloads
            .get(payload_id)
            .map(|entry| entry.value().clone())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.payloads.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Payload used when an identifier has no registration of its own.
    pub fn set_fallback(&self, payload: Arc<dyn Payload>) {
        *self.fallback.write() = Some(payload);
        info!("fallback payload updated");
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_payloads: self.payloads.len(),
            has_fallback: self.fallback.read().is_some(),
        }
    }
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadResolver for PayloadRegistry {
    fn resolve(&self, payload_id: &str) -> Option<Arc<dyn Payload>> {
        self.get(payload_id)
            .or_else(|| self.fallback.read().clone())
    }
}

/// Registry statistics for monitoring
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_payloads: usize,
    pub has_fallback: bool,
}
