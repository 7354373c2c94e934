//! Agent configuration and roster sources

use crate::error::{Result, SwarmError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;
pub const DEFAULT_MAX_RPS: u32 = 1000;

/// Immutable configuration supplied at agent construction.
///
/// Mutation after construction goes through the agent's `update_config`,
/// which is only honored while the agent is offline or in maintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// Control-plane endpoint host, handed to the Transport untouched.
    pub host: String,
    pub port: u16,
    #[serde(default = "default_pool_size")]
    pub worker_pool_size: usize,
    /// Payload used when a caller does not name one.
    pub default_payload: String,
    /// Payload identifiers this agent advertises. Empty means unrestricted.
    #[serde(default)]
    pub payloads: Vec<String>,
    #[serde(default = "default_max_rps")]
    pub max_requests_per_second: u32,
}

fn default_pool_size() -> usize {
    DEFAULT_WORKER_POOL_SIZE
}

fn default_max_rps() -> u32 {
    DEFAULT_MAX_RPS
}

impl AgentConfig {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        default_payload: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            default_payload: default_payload.into(),
            payloads: Vec::new(),
            max_requests_per_second: DEFAULT_MAX_RPS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SwarmError::InvalidConfig {
                reason: "agent name must not be empty".to_string(),
            });
        }
        if self.worker_pool_size == 0 {
            return Err(SwarmError::InvalidConfig {
                reason: "worker pool size must be at least 1".to_string(),
            });
        }
        if self.max_requests_per_second == 0 {
            return Err(SwarmError::InvalidConfig {
                reason: "max requests per second must be at least 1".to_string(),
            });
        }
        if !self.payloads.is_empty() && !self.payloads.contains(&self.default_payload) {
            return Err(SwarmError::InvalidConfig {
                reason: format!(
                    "default payload '{}' is not in the advertised payload set",
                    self.default_payload
                ),
            });
        }
        Ok(())
    }
}

/// Supplies the initial set of agent configs used to populate a fleet.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<Vec<AgentConfig>>;
}

/// A fixed, in-memory roster.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    configs: Vec<AgentConfig>,
}

impl StaticConfigSource {
    pub fn new(configs: Vec<AgentConfig>) -> Self {
        Self { configs }
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<Vec<AgentConfig>> {
        Ok(self.configs.clone())
    }
}

/// Reference roster: 23 specialty agents with sequential control ports.
///
/// This is data for callers to inject through a [`ConfigSource`]; the fleet
/// itself carries no knowledge of these names or payloads.
pub fn default_roster() -> Vec<AgentConfig> {
    const ROSTER: [(&str, &str); 23] = [
        ("alpha", "nuclear_warfare"),
        ("beta", "cyber_warfare"),
        ("gamma", "stealth_ops"),
        ("delta", "emp_warfare"),
        ("epsilon", "bio_warfare"),
        ("zeta", "gravity_control"),
        ("eta", "thermal_annihilation"),
        ("theta", "cryogenic_freeze"),
        ("iota", "quantum_entanglement"),
        ("kappa", "dimensional_portal"),
        ("lambda", "neural_network"),
        ("mu", "molecular_disassembly"),
        ("nu", "sound_wave_devastation"),
        ("xi", "light_manipulation"),
        ("omicron", "dark_matter_control"),
        ("pi", "mathematical_chaos"),
        ("rho", "chemical_reactions"),
        ("sigma", "magnetic_fields"),
        ("tau", "time_manipulation"),
        ("upsilon", "space_time_fabric"),
        ("phi", "consciousness_control"),
        ("chi", "energy_vortex"),
        ("psi", "psychic_warfare"),
    ];

    ROSTER
        .iter()
        .enumerate()
        .map(|(i, (name, payload))| AgentConfig {
            name: (*name).to_string(),
            host: "127.0.0.1".to_string(),
            port: 8081 + i as u16,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            default_payload: (*payload).to_string(),
            payloads: vec![
                (*payload).to_string(),
                "ddos".to_string(),
                "custom".to_string(),
            ],
            max_requests_per_second: DEFAULT_MAX_RPS,
        })
        .collect()
}
