//! Shared helpers for the engine's unit tests

use crate::agent::Agent;
use crate::loopback::LoopbackTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarm_core::{AgentConfig, CancelToken, Payload, PayloadOutcome, PayloadResolver, Target};

/// Deterministic payload: records each burst's target address, runs a fixed
/// number of iterations with every other one succeeding, and polls the
/// token between iterations.
#[derive(Debug)]
pub(crate) struct StubPayload {
    id: String,
    iterations: u64,
    step_delay: Duration,
    started: Arc<Mutex<Vec<String>>>,
}

impl StubPayload {
    pub(crate) fn new(id: &str, iterations: u64, step_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            iterations,
            step_delay,
            started: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn instant(id: &str) -> Arc<Self> {
        Self::new(id, 1, Duration::ZERO)
    }

    /// Payload that spins until its token is cancelled, honoring the
    /// cancellation contract but never finishing on its own.
    pub(crate) fn blocking(id: &str) -> Arc<Self> {
        Self::new(id, u64::MAX, Duration::from_millis(5))
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl Payload for StubPayload {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, target: &Target, cancel: &CancelToken) -> PayloadOutcome {
        self.started.lock().push(target.address.clone());
        let mut outcome = PayloadOutcome::default();
        for i in 0..self.iterations {
            if cancel.is_cancelled() {
                break;
            }
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            outcome.iterations_attempted += 1;
            if i % 2 == 0 {
                outcome.iterations_succeeded += 1;
            }
        }
        outcome
    }
}

/// Minimal resolver over a fixed payload map, no fallback.
#[derive(Default)]
pub(crate) struct StubResolver {
    payloads: HashMap<String, Arc<dyn Payload>>,
}

impl StubResolver {
    pub(crate) fn with(payloads: Vec<Arc<StubPayload>>) -> Arc<Self> {
        let mut map: HashMap<String, Arc<dyn Payload>> = HashMap::new();
        for payload in payloads {
            map.insert(payload.id().to_string(), payload);
        }
        Arc::new(Self { payloads: map })
    }
}

impl PayloadResolver for StubResolver {
    fn resolve(&self, payload_id: &str) -> Option<Arc<dyn Payload>> {
        self.payloads.get(payload_id).cloned()
    }
}

pub(crate) fn test_config(name: &str, pool: usize) -> AgentConfig {
    let mut config = AgentConfig::new(name, "127.0.0.1", 9000, "stub");
    config.worker_pool_size = pool;
    config.max_requests_per_second = 10_000;
    config
}

pub(crate) async fn online_agent(
    name: &str,
    pool: usize,
    resolver: Arc<dyn PayloadResolver>,
) -> Arc<Agent> {
    let agent = Agent::new(test_config(name, pool), resolver, Arc::new(LoopbackTransport::new()))
        .unwrap();
    agent.initialize().await.unwrap();
    agent
}

/// Poll a condition until it holds or the timeout elapses.
pub(crate) async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
