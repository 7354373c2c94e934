//! Dispatch statistics and status reporting
//!
//! A [`StatsRecorder`] is owned by one agent and updated concurrently by all
//! of its workers. The three iteration counters move together under one
//! short-lived lock so every snapshot satisfies
//! `total == succeeded + failed`; the lock is scoped strictly to the counter
//! update and is never held across a payload iteration.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use swarm_core::AgentState;

/// Window over which the uptime ratio decays without activity.
const UPTIME_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    total: u64,
    succeeded: u64,
    failed: u64,
}

/// Concurrent run statistics for a single agent.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    counters: Mutex<Counters>,
    current_target: RwLock<Option<String>>,
    dispatching: AtomicBool,
    last_activity: Mutex<Option<Instant>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one payload burst into the counters. `succeeded` must not exceed
    /// `attempted`; the difference is recorded as failed iterations.
    pub fn record_outcome(&self, attempted: u64, succeeded: u64) {
        debug_assert!(succeeded <= attempted);
        {
            let mut counters = self.counters.lock();
            counters.total += attempted;
            counters.succeeded += succeeded;
            counters.failed += attempted - succeeded;
        }
        self.touch();
    }

    /// Mark wall-clock activity, refreshing the uptime window.
    pub fn touch(&self) {
        *self.last_activity.lock() = Some(Instant::now());
    }

    pub fn set_dispatching(&self, dispatching: bool) {
        self.dispatching.store(dispatching, Ordering::SeqCst);
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::SeqCst)
    }

    /// Identifier of the most recently accepted target.
    pub fn set_current_target(&self, target: Option<String>) {
        *self.current_target.write() = target;
    }

    pub fn current_target(&self) -> Option<String> {
        self.current_target.read().clone()
    }

    /// Point-in-time view. `up` reflects whether the owning agent currently
    /// holds live workers; a down agent always reports zero uptime.
    pub fn snapshot(&self, up: bool) -> StatsSnapshot {
        let counters = *self.counters.lock();
        StatsSnapshot {
            total_requests: counters.total,
            successful_requests: counters.succeeded,
            failed_requests: counters.failed,
            uptime_ratio: self.uptime_ratio(up),
            is_dispatching: self.is_dispatching(),
        }
    }

    fn uptime_ratio(&self, up: bool) -> f64 {
        if !up {
            return 0.0;
        }
        match *self.last_activity.lock() {
            None => 0.0,
            Some(at) => {
                let elapsed = at.elapsed().min(UPTIME_WINDOW);
                1.0 - elapsed.as_secs_f64() / UPTIME_WINDOW.as_secs_f64()
            }
        }
    }
}

/// Consistent view of an agent's counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub uptime_ratio: f64,
    pub is_dispatching: bool,
}

/// Point-in-time status report for one agent, producible synchronously on
/// demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    pub name: String,
    pub state: AgentState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub uptime_ratio: f64,
    pub is_dispatching: bool,
    pub current_target: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentReport {
    pub fn new(
        name: impl Into<String>,
        state: AgentState,
        snapshot: StatsSnapshot,
        current_target: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            state,
            total_requests: snapshot.total_requests,
            successful_requests: snapshot.successful_requests,
            failed_requests: snapshot.failed_requests,
            uptime_ratio: snapshot.uptime_ratio,
            is_dispatching: snapshot.is_dispatching,
            current_target,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregated fleet-wide report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub agents: Vec<AgentReport>,
    pub total_agents: usize,
    pub active_agents: usize,
    pub total_requests: u64,
    pub generated_at: DateTime<Utc>,
}

impl FleetReport {
    pub fn from_agents(mut agents: Vec<AgentReport>) -> Self {
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        let total_agents = agents.len();
        let active_agents = agents.iter().filter(|a| a.state.is_up()).count();
        let total_requests = agents.iter().map(|a| a.total_requests).sum();
        Self {
            agents,
            total_agents,
            active_agents,
            total_requests,
            generated_at: Utc::now(),
        }
    }
}
