//! Fleet coordination
//!
//! A fleet exclusively owns a named collection of agents and fans lifecycle
//! and dispatch operations out to all of them concurrently. Fan-out never
//! short-circuits: every agent is attempted, every outcome lands in the
//! report, and the aggregate succeeds only if every agent did.

use crate::agent::Agent;
use dashmap::DashMap;
use metrics::FleetReport;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use swarm_core::{ConfigSource, PayloadResolver, Result, SwarmError, Target, Transport};
use tracing::{info, instrument, warn};

/// Result of one fan-out operation on one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub agent: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate of a fan-out: per-agent outcomes plus the AND of their results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetOutcome {
    pub outcomes: Vec<AgentOutcome>,
    pub all_succeeded: bool,
}

impl FleetOutcome {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// The owning collection of agents.
pub struct Fleet {
    agents: DashMap<String, Arc<Agent>>,
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("agent_count", &self.agents.len())
            .finish()
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Build a fleet from an injected roster. The fleet itself knows no
    /// agent names or payload assignments.
    pub fn from_source(
        source: &dyn ConfigSource,
        resolver: Arc<dyn PayloadResolver>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let fleet = Self::new();
        for config in source.load()? {
            let agent = Agent::new(config, resolver.clone(), transport.clone())?;
            fleet.add_agent(agent)?;
        }
        info!(agents = fleet.len(), "fleet populated from config source");
        Ok(fleet)
    }

    pub fn add_agent(&self, agent: Arc<Agent>) -> Result<()> {
        let name = agent.name();
        match self.agents.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SwarmError::InvalidConfig {
                reason: format!("duplicate agent name: {name}"),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(agent);
                info!(agent = %name, "agent added to fleet");
                Ok(())
            }
        }
    }

    /// Stop an agent, then detach it. No agent keeps running outside the
    /// fleet's bookkeeping.
    #[instrument(skip(self))]
    pub async fn remove_agent(&self, name: &str) -> Result<Arc<Agent>> {
        let agent = self
            .agents
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SwarmError::AgentNotFound {
                name: name.to_string(),
            })?;
        agent.stop().await?;
        self.agents.remove(name);
        info!(agent = name, "agent detached from fleet");
        Ok(agent)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    #[instrument(skip(self))]
    pub async fn initialize_all(&self) -> FleetOutcome {
        self.fan_out("initialize", |agent| async move { agent.initialize().await })
            .await
    }

    /// Alias for [`Fleet::initialize_all`].
    pub async fn start_all(&self) -> FleetOutcome {
        self.initialize_all().await
    }

    #[instrument(skip(self))]
    pub async fn stop_all(&self) -> FleetOutcome {
        self.fan_out("stop", |agent| async move { agent.stop().await })
            .await
    }

    #[instrument(skip(self))]
    pub async fn restart_all(&self) -> FleetOutcome {
        self.fan_out("restart", |agent| async move { agent.restart().await })
            .await
    }

    #[instrument(skip(self))]
    pub async fn emergency_stop_all(&self) -> FleetOutcome {
        self.fan_out("emergency_stop", |agent| async move {
            agent.emergency_stop();
            Ok(())
        })
        .await
    }

    /// Coordinated dispatch of one logical target to every agent. Each
    /// agent gets its own copy; all copies share one cancellation token, so
    /// cancelling the original reaches every in-flight execution.
    #[instrument(skip(self, target), fields(payload = %target.payload_id, address = %target.address))]
    pub async fn dispatch_to_all(&self, target: &Target) -> FleetOutcome {
        let outcome = self
            .fan_out("dispatch", {
                let target = target.clone();
                move |agent| {
                    let target = target.clone();
                    async move { agent.dispatch(target).map(|_| ()) }
                }
            })
            .await;
        info!(
            accepted = outcome.succeeded(),
            rejected = outcome.failed(),
            "coordinated dispatch fanned out"
        );
        outcome
    }

    /// Clear queued targets on every agent. In-flight targets are untouched.
    #[instrument(skip(self))]
    pub async fn cancel_all(&self) -> FleetOutcome {
        self.fan_out("cancel", |agent| async move {
            agent.cancel_current();
            Ok(())
        })
        .await
    }

    /// Aggregated point-in-time report over all agents.
    pub fn report(&self) -> FleetReport {
        FleetReport::from_agents(self.agents.iter().map(|e| e.value().report()).collect())
    }

    /// Run one operation against every agent concurrently and collect every
    /// outcome. No short-circuit: a failing agent never hides the others.
    async fn fan_out<F, Fut>(&self, operation: &'static str, f: F) -> FleetOutcome
    where
        F: Fn(Arc<Agent>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(self.agents.len());
        for entry in self.agents.iter() {
            let name = entry.key().clone();
            handles.push((name, tokio::spawn(f(entry.value().clone()))));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut all_succeeded = true;
        for (agent, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(())) => AgentOutcome {
                    agent,
                    success: true,
                    error: None,
                },
                Ok(Err(err)) => {
                    warn!(agent = %agent, operation, error = %err, "fan-out step failed");
                    all_succeeded = false;
                    AgentOutcome {
                        agent,
                        success: false,
                        error: Some(err.to_string()),
                    }
                }
                Err(err) => {
                    warn!(agent = %agent, operation, error = %err, "fan-out task panicked");
                    all_succeeded = false;
                    AgentOutcome {
                        agent,
                        success: false,
                        error: Some(format!("task failure: {err}")),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes.sort_by(|a, b| a.agent.cmp(&b.agent));
        FleetOutcome {
            outcomes,
            all_succeeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTransport;
    use crate::test_support::{test_config, wait_until, StubPayload, StubResolver};
    use std::time::Duration;
    use swarm_core::{AgentState, StaticConfigSource};

    fn two_agent_source() -> StaticConfigSource {
        StaticConfigSource::new(vec![test_config("alpha", 2), test_config("beta", 2)])
    }

    #[tokio::test]
    async fn initialize_all_brings_every_agent_online() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let fleet = Fleet::from_source(
            &two_agent_source(),
            resolver,
            Arc::new(LoopbackTransport::new()),
        )
        .unwrap();

        let outcome = fleet.initialize_all().await;
        assert!(outcome.all_succeeded);
        assert_eq!(outcome.succeeded(), 2);
        for name in fleet.names() {
            assert_eq!(fleet.get(&name).unwrap().state(), AgentState::Online);
        }
    }

    #[tokio::test]
    async fn partial_failure_is_visible_per_agent() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let fleet = Fleet::new();
        fleet
            .add_agent(
                Agent::new(
                    test_config("healthy", 1),
                    resolver.clone(),
                    Arc::new(LoopbackTransport::new()),
                )
                .unwrap(),
            )
            .unwrap();
        fleet
            .add_agent(
                Agent::new(
                    test_config("unreachable", 1),
                    resolver,
                    Arc::new(LoopbackTransport::refusing()),
                )
                .unwrap(),
            )
            .unwrap();

        let outcome = fleet.initialize_all().await;
        assert!(!outcome.all_succeeded);
        assert_eq!(outcome.succeeded(), 1);
        let failed = outcome
            .outcomes
            .iter()
            .find(|o| o.agent == "unreachable")
            .unwrap();
        assert!(!failed.success);
        assert!(failed.error.as_ref().unwrap().contains("connection"));
        assert_eq!(
            fleet.get("healthy").unwrap().state(),
            AgentState::Online
        );
        assert_eq!(
            fleet.get("unreachable").unwrap().state(),
            AgentState::Failed
        );
    }

    #[tokio::test]
    async fn emergency_stop_all_fails_every_agent_regardless_of_state() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let fleet = Fleet::from_source(
            &StaticConfigSource::new(vec![
                test_config("up", 1),
                test_config("down", 1),
                test_config("broken", 1),
            ]),
            resolver,
            Arc::new(LoopbackTransport::new()),
        )
        .unwrap();
        fleet.get("up").unwrap().initialize().await.unwrap();
        // "down" stays offline; "broken" goes through a failed initialize.
        fleet.get("broken").unwrap().emergency_stop();

        let outcome = fleet.emergency_stop_all().await;
        assert!(outcome.all_succeeded);
        for name in fleet.names() {
            assert_eq!(fleet.get(&name).unwrap().state(), AgentState::Failed);
        }
    }

    #[tokio::test]
    async fn remove_agent_stops_it_first() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let fleet = Fleet::from_source(
            &two_agent_source(),
            resolver,
            Arc::new(LoopbackTransport::new()),
        )
        .unwrap();
        fleet.initialize_all().await;

        let removed = fleet.remove_agent("alpha").await.unwrap();
        assert_eq!(removed.state(), AgentState::Offline);
        assert_eq!(fleet.len(), 1);
        assert!(matches!(
            fleet.remove_agent("alpha").await,
            Err(SwarmError::AgentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_agent_names_are_rejected() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let fleet = Fleet::new();
        let transport = Arc::new(LoopbackTransport::new());
        fleet
            .add_agent(Agent::new(test_config("alpha", 1), resolver.clone(), transport.clone()).unwrap())
            .unwrap();
        let duplicate = Agent::new(test_config("alpha", 1), resolver, transport).unwrap();
        assert!(matches!(
            fleet.add_agent(duplicate),
            Err(SwarmError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn coordinated_dispatch_reaches_every_online_agent() {
        let payload = StubPayload::instant("stub");
        let resolver = StubResolver::with(vec![payload.clone()]);
        let fleet = Fleet::from_source(
            &two_agent_source(),
            resolver,
            Arc::new(LoopbackTransport::new()),
        )
        .unwrap();
        let outcome = fleet.initialize_all().await;
        assert!(outcome.all_succeeded);

        let target = Target::new("203.0.113.50:80", "stub", 1, Duration::ZERO);
        let outcome = fleet.dispatch_to_all(&target).await;
        assert!(outcome.all_succeeded);

        let alpha = fleet.get("alpha").unwrap();
        let beta = fleet.get("beta").unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                alpha.report().total_requests >= 1 && beta.report().total_requests >= 1
            })
            .await
        );

        fleet.cancel_all().await;
        let outcome = fleet.stop_all().await;
        assert!(outcome.all_succeeded);
        assert_eq!(alpha.state(), AgentState::Offline);
        assert_eq!(beta.state(), AgentState::Offline);
        assert_eq!(alpha.active_targets(), 0);
        assert_eq!(beta.active_targets(), 0);
    }

    #[tokio::test]
    async fn dispatch_to_all_shares_one_cancellation_token() {
        let blocking = StubPayload::blocking("stub");
        let resolver = StubResolver::with(vec![blocking]);
        let fleet = Fleet::from_source(
            &two_agent_source(),
            resolver,
            Arc::new(LoopbackTransport::new()),
        )
        .unwrap();
        fleet.initialize_all().await;

        let target = Target::new("203.0.113.50:80", "stub", 1, Duration::from_secs(60));
        let outcome = fleet.dispatch_to_all(&target).await;
        assert!(outcome.all_succeeded);

        let alpha = fleet.get("alpha").unwrap();
        let beta = fleet.get("beta").unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                alpha.active_targets() == 1 && beta.active_targets() == 1
            })
            .await
        );

        // One cancel on the original target reaches both in-flight copies.
        assert!(target.cancel());
        assert!(
            wait_until(Duration::from_secs(2), || {
                alpha.state() == AgentState::Online && beta.state() == AgentState::Online
            })
            .await
        );
        fleet.stop_all().await;
    }

    #[tokio::test]
    async fn restart_all_recovers_failed_agents() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let transport = Arc::new(LoopbackTransport::refusing());
        let fleet = Fleet::from_source(&two_agent_source(), resolver, transport.clone()).unwrap();

        let outcome = fleet.initialize_all().await;
        assert!(!outcome.all_succeeded);

        transport.accept();
        let outcome = fleet.restart_all().await;
        assert!(outcome.all_succeeded);
        for name in fleet.names() {
            assert_eq!(fleet.get(&name).unwrap().state(), AgentState::Online);
        }
        fleet.stop_all().await;
    }

    #[tokio::test]
    async fn fleet_report_aggregates_all_agents() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let fleet = Fleet::from_source(
            &two_agent_source(),
            resolver,
            Arc::new(LoopbackTransport::new()),
        )
        .unwrap();
        fleet.initialize_all().await;

        let report = fleet.report();
        assert_eq!(report.total_agents, 2);
        assert_eq!(report.active_agents, 2);
        assert_eq!(report.agents[0].name, "alpha");
        assert_eq!(report.agents[1].name, "beta");
        fleet.stop_all().await;
    }
}
