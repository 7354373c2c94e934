//! Built-in payload profiles
//!
//! The built-in payloads are behaviorally interchangeable: each is a
//! [`ProfilePayload`] that differs only in iteration count, per-iteration
//! latency, and success probability. The engine treats them polymorphically
//! through the registry; nothing outside this module knows one identifier
//! from another.

use crate::registry::PayloadRegistry;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{CancelToken, Payload, PayloadOutcome, Target};

/// Execution profile for one payload variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadProfile {
    pub id: String,
    /// Iterations per burst before intensity scaling.
    pub base_iterations: u32,
    pub iteration_delay_ms: u64,
    /// Probability that a single iteration counts as succeeded.
    pub success_probability: f64,
}

/// A payload whose behavior is fully described by its profile.
#[derive(Debug, Clone)]
pub struct ProfilePayload {
    profile: PayloadProfile,
}

impl ProfilePayload {
    pub fn new(profile: PayloadProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &PayloadProfile {
        &self.profile
    }
}

#[async_trait]
impl Payload for ProfilePayload {
    fn id(&self) -> &str {
        &self.profile.id
    }

    async fn run(&self, target: &Target, cancel: &CancelToken) -> PayloadOutcome {
        let iterations = self
            .profile
            .base_iterations
            .saturating_mul(target.intensity.max(1));
        let mut outcome = PayloadOutcome::default();

        for _ in 0..iterations {
            if cancel.is_cancelled() {
                break;
            }
            let delay = jittered_delay(self.profile.iteration_delay_ms);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            outcome.iterations_attempted += 1;
            if sample_success(self.profile.success_probability) {
                outcome.iterations_succeeded += 1;
            }
        }
        outcome
    }
}

// Both helpers keep the thread-local rng out of scope across await points.
fn jittered_delay(base_ms: u64) -> Duration {
    if base_ms == 0 {
        return Duration::ZERO;
    }
    let low = base_ms / 2;
    let high = base_ms + base_ms / 2;
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

fn sample_success(probability: f64) -> bool {
    rand::thread_rng().gen_bool(probability.clamp(0.0, 1.0))
}

/// Registry preloaded with the built-in profile table, with `custom` as the
/// fallback for unknown identifiers.
pub fn builtin_registry() -> PayloadRegistry {
    let registry = PayloadRegistry::new();
    for profile in builtin_profiles() {
        registry.register(Arc::new(ProfilePayload::new(profile)));
    }
    let custom = ProfilePayload::new(PayloadProfile {
        id: "custom".to_string(),
        base_iterations: 1,
        iteration_delay_ms: 100,
        success_probability: 0.90,
    });
    registry.register(Arc::new(custom.clone()));
    registry.set_fallback(Arc::new(custom));
    registry
}

/// The built-in profile table.
pub fn builtin_profiles() -> Vec<PayloadProfile> {
    const TABLE: [(&str, u32, u64, f64); 27] = [
        ("ddos", 5, 10, 0.90),
        ("port_scan", 15, 5, 0.80),
        ("vuln_scan", 10, 100, 0.20),
        ("brute_force", 6, 100, 0.01),
        ("nuclear_warfare", 10, 100, 0.90),
        ("cyber_warfare", 15, 50, 0.95),
        ("stealth_ops", 20, 25, 0.98),
        ("emp_warfare", 8, 200, 0.97),
        ("bio_warfare", 12, 150, 0.96),
        ("gravity_control", 6, 100, 0.99),
        ("thermal_annihilation", 9, 100, 0.975),
        ("cryogenic_freeze", 11, 100, 0.965),
        ("quantum_entanglement", 7, 100, 0.985),
        ("dimensional_portal", 5, 100, 0.995),
        ("neural_network", 8, 100, 0.97),
        ("molecular_disassembly", 10, 100, 0.96),
        ("sound_wave_devastation", 13, 100, 0.98),
        ("light_manipulation", 14, 100, 0.99),
        ("dark_matter_control", 4, 100, 0.995),
        ("mathematical_chaos", 16, 100, 0.95),
        ("chemical_reactions", 12, 100, 0.97),
        ("magnetic_fields", 9, 100, 0.975),
        ("time_manipulation", 3, 100, 0.999),
        ("space_time_fabric", 2, 100, 0.9995),
        ("consciousness_control", 7, 100, 0.98),
        ("energy_vortex", 11, 100, 0.965),
        ("psychic_warfare", 15, 100, 0.955),
    ];

    TABLE
        .iter()
        .map(|(id, base_iterations, delay, probability)| PayloadProfile {
            id: (*id).to_string(),
            base_iterations: *base_iterations,
            iteration_delay_ms: *delay,
            success_probability: *probability,
        })
        .collect()
}
