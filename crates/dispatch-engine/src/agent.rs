//! Agent lifecycle state machine and worker pool
//!
//! One agent owns one lifecycle state, one FIFO target queue, and a bounded
//! pool of workers all contending on that queue. State transitions are
//! serialized: quick reads go through a short-lived lock, and the
//! multi-step lifecycle operations are additionally ordered by an async
//! guard so no caller observes a half-applied transition.
//!
//! Cancellation is two-level. `cancel_current` and `stop` discard
//! queued-but-unstarted targets only; a target already picked up by a worker
//! runs to its duration bound unless its own token is set. `emergency_stop`
//! escalates: it force-cancels in-flight tokens, marks the agent failed
//! immediately, and joins the workers from a detached task.

use crate::queue::{QueuedTarget, TargetQueue};
use metrics::{AgentReport, StatsRecorder};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use swarm_core::{
    AgentConfig, AgentState, CancelToken, Connection, ControlFrame, DispatchId, Endpoint,
    PayloadResolver, Result, SwarmError, Target, Transport,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const JOIN_WARN_INTERVAL: Duration = Duration::from_secs(1);
const CONTRACT_GRACE: Duration = Duration::from_secs(5);
const POLLER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct InFlightEntry {
    token: CancelToken,
    deadline: Instant,
}

/// Tracks the targets currently held by workers so emergency stop can reach
/// them and drain checks stay O(1).
#[derive(Debug, Default)]
struct InFlight {
    entries: Mutex<HashMap<usize, InFlightEntry>>,
    active: AtomicUsize,
}

impl InFlight {
    fn begin(&self, worker_id: usize, token: CancelToken, deadline: Instant) {
        self.entries
            .lock()
            .insert(worker_id, InFlightEntry { token, deadline });
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self, worker_id: usize) {
        if self.entries.lock().remove(&worker_id).is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Force-set every in-flight token, returning how many edges this call
    /// observed.
    fn cancel_all(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.token.cancel())
            .count()
    }

    fn latest_deadline(&self) -> Option<Instant> {
        self.entries.lock().values().map(|e| e.deadline).max()
    }
}

/// State shared between the agent handle and its workers.
#[derive(Debug)]
struct AgentShared {
    state: Mutex<AgentState>,
    stats: StatsRecorder,
    in_flight: InFlight,
}

impl AgentShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(AgentState::Offline),
            stats: StatsRecorder::new(),
            in_flight: InFlight::default(),
        }
    }

    /// Re-enter Online once the queue is drained and no worker holds a
    /// target.
    fn finish_if_drained(&self, agent: &str, queue: &TargetQueue) {
        if queue.is_empty() && self.in_flight.active() == 0 {
            {
                let mut state = self.state.lock();
                if *state == AgentState::Dispatching {
                    *state = AgentState::Online;
                } else {
                    return;
                }
            }
            self.stats.set_dispatching(false);
            self.stats.set_current_target(None);
            info!(agent, "dispatch drained, back online");
        }
    }
}

/// Everything that only exists while the agent is up.
struct AgentRuntime {
    queue: Arc<TargetQueue>,
    workers: Vec<JoinHandle<()>>,
    poller: JoinHandle<()>,
    poller_stop: CancelToken,
    connection: Arc<dyn Connection>,
}

/// One managed worker entity: lifecycle state, target queue, worker pool,
/// and run statistics.
pub struct Agent {
    config: RwLock<Arc<AgentConfig>>,
    shared: Arc<AgentShared>,
    resolver: Arc<dyn PayloadResolver>,
    transport: Arc<dyn Transport>,
    runtime: Mutex<Option<AgentRuntime>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.config.read().name)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .field("active_targets", &self.active_targets())
            .finish()
    }
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        resolver: Arc<dyn PayloadResolver>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            shared: Arc::new(AgentShared::new()),
            resolver,
            transport,
            runtime: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn name(&self) -> String {
        self.config.read().name.clone()
    }

    pub fn config(&self) -> Arc<AgentConfig> {
        self.config.read().clone()
    }

    pub fn default_payload(&self) -> String {
        self.config.read().default_payload.clone()
    }

    pub fn state(&self) -> AgentState {
        *self.shared.state.lock()
    }

    /// Targets accepted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.runtime
            .lock()
            .as_ref()
            .map_or(0, |rt| rt.queue.len())
    }

    /// Targets currently being executed by workers.
    pub fn active_targets(&self) -> usize {
        self.shared.in_flight.active()
    }

    /// Point-in-time status report.
    pub fn report(&self) -> AgentReport {
        let state = self.state();
        let snapshot = self.shared.stats.snapshot(state.is_up());
        AgentReport::new(
            self.name(),
            state,
            snapshot,
            self.shared.stats.current_target(),
        )
    }

    /// Acquire the transport connection, start the worker pool, and go
    /// Online. Idempotent: a no-op success when already up. On transport
    /// failure the agent lands in Failed and no workers are started.
    #[instrument(skip(self), fields(agent = %self.name()))]
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        {
            let state = self.shared.state.lock();
            if state.accepts_dispatch() {
                warn!("already online, initialize is a no-op");
                return Ok(());
            }
        }

        // Maintenance keeps workers and transport alive; re-arming is a pure
        // state transition.
        if self.runtime.lock().is_some() {
            *self.shared.state.lock() = AgentState::Online;
            self.shared.stats.touch();
            info!("maintenance lifted, agent online");
            return Ok(());
        }

        let config = self.config();
        let endpoint = Endpoint {
            host: config.host.clone(),
            port: config.port,
        };
        let connection: Arc<dyn Connection> = match self.transport.connect(&endpoint).await {
            Ok(connection) => Arc::from(connection),
            Err(err) => {
                *self.shared.state.lock() = AgentState::Failed;
                error!(error = %err, %endpoint, "transport connect failed, agent marked failed");
                return Err(err);
            }
        };

        let queue = Arc::new(TargetQueue::new());
        let mut workers = Vec::with_capacity(config.worker_pool_size);
        for worker_id in 0..config.worker_pool_size {
            workers.push(tokio::spawn(worker_loop(WorkerContext {
                agent: config.name.clone(),
                worker_id,
                queue: queue.clone(),
                shared: self.shared.clone(),
                max_rps: config.max_requests_per_second,
            })));
        }

        let poller_stop = CancelToken::new();
        let poller = tokio::spawn(control_poller(PollerContext {
            name: config.name.clone(),
            agent: Arc::downgrade(self),
            connection: connection.clone(),
            stop: poller_stop.clone(),
        }));

        *self.runtime.lock() = Some(AgentRuntime {
            queue,
            workers,
            poller,
            poller_stop,
            connection,
        });
        *self.shared.state.lock() = AgentState::Online;
        self.shared.stats.touch();
        info!(workers = config.worker_pool_size, %endpoint, "agent online");
        Ok(())
    }

    /// Alias for [`Agent::initialize`], matching the fleet's start verb.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.initialize().await
    }

    /// Graceful shutdown: discards queued targets, releases the transport,
    /// and blocks until every worker has exited. In-flight targets are not
    /// force-cancelled; a payload that ignores its cancellation window is
    /// surfaced loudly rather than tolerated silently.
    #[instrument(skip(self), fields(agent = %self.name()))]
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        {
            let state = self.shared.state.lock();
            if *state == AgentState::Offline {
                warn!("already offline, stop is a no-op");
                return Ok(());
            }
        }

        let runtime = self.runtime.lock().take();
        let Some(runtime) = runtime else {
            // Emergency stop already tore the runtime down; only the state
            // transition remains.
            *self.shared.state.lock() = AgentState::Offline;
            self.shared.stats.set_dispatching(false);
            self.shared.stats.set_current_target(None);
            info!("agent offline");
            return Ok(());
        };

        runtime.queue.close();
        let cleared = runtime.queue.clear_pending();
        if cleared > 0 {
            info!(cleared, "queued targets discarded");
        }
        runtime.poller_stop.cancel();

        let drain_deadline = self
            .shared
            .in_flight
            .latest_deadline()
            .map(|deadline| deadline + CONTRACT_GRACE);
        let mut violation_logged = false;
        for (worker_id, handle) in runtime.workers.into_iter().enumerate() {
            let mut handle = handle;
            loop {
                match tokio::time::timeout(JOIN_WARN_INTERVAL, &mut handle).await {
                    Ok(joined) => {
                        if let Err(err) = joined {
                            warn!(worker_id, error = %err, "worker task ended abnormally");
                        }
                        break;
                    }
                    Err(_) => {
                        warn!(worker_id, "waiting for worker to finish its in-flight target");
                        if let Some(deadline) = drain_deadline {
                            if Instant::now() > deadline && !violation_logged {
                                error!(
                                    worker_id,
                                    "in-flight payload overran its duration bound and \
                                     cancellation window, payload contract violation"
                                );
                                violation_logged = true;
                            }
                        }
                    }
                }
            }
        }

        let mut poller = runtime.poller;
        if tokio::time::timeout(POLLER_JOIN_TIMEOUT, &mut poller)
            .await
            .is_err()
        {
            warn!("control poller did not exit in time, aborting it");
            poller.abort();
        }

        runtime.connection.close().await;

        *self.shared.state.lock() = AgentState::Offline;
        self.shared.stats.set_dispatching(false);
        self.shared.stats.set_current_target(None);
        info!("agent offline");
        Ok(())
    }

    /// `stop` then `initialize`; the agent is left wherever the failing
    /// sub-step put it.
    #[instrument(skip(self), fields(agent = %self.name()))]
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        info!("restarting");
        self.stop().await?;
        self.initialize().await
    }

    /// Best-effort hard stop: force-cancels in-flight targets, marks the
    /// agent Failed immediately, and joins workers from a detached task so
    /// the caller never blocks.
    #[instrument(skip(self), fields(agent = %self.name()))]
    pub fn emergency_stop(&self) {
        warn!("EMERGENCY STOP, halting all operations");
        *self.shared.state.lock() = AgentState::Failed;

        let cancelled = self.shared.in_flight.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "in-flight targets force-cancelled");
        }

        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.queue.close();
            let cleared = runtime.queue.clear_pending();
            if cleared > 0 {
                info!(cleared, "queued targets discarded");
            }
            runtime.poller_stop.cancel();
            let agent = self.name();
            tokio::spawn(async move {
                for handle in runtime.workers {
                    let _ = handle.await;
                }
                let _ = tokio::time::timeout(POLLER_JOIN_TIMEOUT, runtime.poller).await;
                runtime.connection.close().await;
                debug!(agent, "emergency teardown complete");
            });
        }

        self.shared.stats.set_dispatching(false);
        self.shared.stats.set_current_target(None);
    }

    /// Accept a target onto the queue. Rejected unless the agent is Online
    /// or already Dispatching; returns as soon as the target is enqueued.
    #[instrument(skip(self, target), fields(agent = %self.name(), payload = %target.payload_id, address = %target.address))]
    pub fn dispatch(&self, target: Target) -> Result<DispatchId> {
        let payload =
            self.resolver
                .resolve(&target.payload_id)
                .ok_or_else(|| SwarmError::PayloadNotFound {
                    payload_id: target.payload_id.clone(),
                })?;
        let id = Uuid::new_v4();
        let address = target.address.clone();

        {
            let mut state = self.shared.state.lock();
            if !state.accepts_dispatch() {
                return Err(SwarmError::rejected("dispatch", *state));
            }
            let runtime = self.runtime.lock();
            let Some(rt) = runtime.as_ref() else {
                return Err(SwarmError::rejected("dispatch", *state));
            };
            rt.queue.push(QueuedTarget {
                id,
                target,
                payload,
            })?;
            *state = AgentState::Dispatching;
        }

        self.shared.stats.set_dispatching(true);
        self.shared.stats.set_current_target(Some(address));
        self.shared.stats.touch();
        info!(dispatch_id = %id, "target accepted");
        Ok(id)
    }

    /// Convenience dispatch using the configured default payload.
    pub fn dispatch_default(
        &self,
        address: impl Into<String>,
        intensity: u32,
        duration: Duration,
    ) -> Result<DispatchId> {
        let payload_id = self.default_payload();
        self.dispatch(Target::new(address, payload_id, intensity, duration))
    }

    /// Discard queued-but-unstarted targets. Does not touch a target a
    /// worker has already picked up; in-flight work stops only through its
    /// own token or duration bound.
    #[instrument(skip(self), fields(agent = %self.name()))]
    pub fn cancel_current(&self) -> usize {
        // The queue handle is cloned out so no path ever holds the runtime
        // lock while touching the state lock.
        let queue = self.runtime.lock().as_ref().map(|rt| rt.queue.clone());
        let Some(queue) = queue else {
            return 0;
        };
        let cleared = queue.clear_pending();
        if cleared > 0 {
            info!(cleared, "queued targets cancelled");
        }
        self.shared.finish_if_drained(&self.name(), &queue);
        cleared
    }

    /// Park the agent: queued targets are discarded, workers stay up, the
    /// transport stays connected, and dispatch is rejected until the next
    /// `initialize`.
    #[instrument(skip(self), fields(agent = %self.name()))]
    pub async fn activate_maintenance(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        {
            let mut state = self.shared.state.lock();
            match *state {
                AgentState::Online | AgentState::Dispatching => {
                    *state = AgentState::Maintenance;
                }
                AgentState::Maintenance => {
                    warn!("already in maintenance");
                    return Ok(());
                }
                other => return Err(SwarmError::rejected("activate_maintenance", other)),
            }
        }
        let cleared = self.cancel_current();
        self.shared.stats.set_dispatching(false);
        info!(cleared, "maintenance activated");
        Ok(())
    }

    /// Replace the config. Only honored while Offline or in Maintenance;
    /// the new worker-pool size takes effect at the next `initialize`.
    #[instrument(skip(self, config), fields(agent = %self.name()))]
    pub async fn update_config(&self, config: AgentConfig) -> Result<()> {
        config.validate()?;
        let _guard = self.lifecycle.lock().await;
        let state = self.state();
        match state {
            AgentState::Offline | AgentState::Maintenance => {
                *self.config.write() = Arc::new(config);
                info!("config updated");
                Ok(())
            }
            other => Err(SwarmError::rejected("update_config", other)),
        }
    }
}

struct WorkerContext {
    agent: String,
    worker_id: usize,
    queue: Arc<TargetQueue>,
    shared: Arc<AgentShared>,
    max_rps: u32,
}

async fn worker_loop(ctx: WorkerContext) {
    debug!(agent = %ctx.agent, worker_id = ctx.worker_id, "worker started");
    while let Some(item) = ctx.queue.pop().await {
        execute_target(&ctx, item).await;
        ctx.shared.finish_if_drained(&ctx.agent, &ctx.queue);
    }
    debug!(agent = %ctx.agent, worker_id = ctx.worker_id, "worker exiting");
}

/// Run one target to completion, duration expiry, or cancellation,
/// re-invoking the payload in paced bursts.
async fn execute_target(ctx: &WorkerContext, item: QueuedTarget) {
    let QueuedTarget {
        id,
        target,
        payload,
    } = item;
    let token = target.cancel_token();
    let deadline = Instant::now() + target.duration;

    {
        let mut state = ctx.shared.state.lock();
        if *state == AgentState::Online {
            *state = AgentState::Dispatching;
        }
    }
    ctx.shared.stats.set_dispatching(true);
    ctx.shared
        .in_flight
        .begin(ctx.worker_id, token.clone(), deadline);
    info!(
        agent = %ctx.agent,
        worker_id = ctx.worker_id,
        dispatch_id = %id,
        payload = %target.payload_id,
        address = %target.address,
        "target started"
    );

    let cycle_pause = Duration::from_secs(1) / ctx.max_rps.max(1);
    loop {
        let outcome = payload.run(&target, &token).await;
        ctx.shared
            .stats
            .record_outcome(outcome.iterations_attempted, outcome.iterations_succeeded);
        if token.is_cancelled() {
            info!(agent = %ctx.agent, dispatch_id = %id, "target cancelled mid-flight");
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let pause = cycle_pause.min(deadline.saturating_duration_since(now));
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    ctx.shared.in_flight.end(ctx.worker_id);
    info!(agent = %ctx.agent, dispatch_id = %id, "target finished");
}

struct PollerContext {
    name: String,
    agent: Weak<Agent>,
    connection: Arc<dyn Connection>,
    stop: CancelToken,
}

/// Background control loop: periodic heartbeats out, opportunistic control
/// frames in. Transport failures are logged and never touch agent state.
async fn control_poller(ctx: PollerContext) {
    debug!(agent = %ctx.name, "control poller started");
    let mut last_heartbeat: Option<Instant> = None;
    loop {
        if ctx.stop.is_cancelled() {
            break;
        }

        if last_heartbeat.map_or(true, |at| at.elapsed() >= HEARTBEAT_INTERVAL) {
            match ControlFrame::heartbeat(&ctx.name).to_bytes() {
                Ok(bytes) => {
                    if let Err(err) = ctx.connection.send(&bytes).await {
                        warn!(agent = %ctx.name, error = %err, "heartbeat send failed");
                    }
                }
                Err(err) => warn!(agent = %ctx.name, error = %err, "heartbeat encode failed"),
            }
            last_heartbeat = Some(Instant::now());
        }

        match ctx.connection.receive().await {
            Ok(Some(bytes)) => match ControlFrame::from_bytes(&bytes) {
                Ok(frame) => handle_frame(&ctx, frame).await,
                Err(err) => {
                    warn!(agent = %ctx.name, error = %err, "undecodable control frame dropped")
                }
            },
            Ok(None) => {}
            Err(err) => warn!(agent = %ctx.name, error = %err, "control receive failed"),
        }

        tokio::time::sleep(CONTROL_POLL_INTERVAL).await;
    }
    debug!(agent = %ctx.name, "control poller exiting");
}

fn handle_frame<'a>(
    ctx: &'a PollerContext,
    frame: ControlFrame,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
    let Some(agent) = ctx.agent.upgrade() else {
        return;
    };
    match frame {
        ControlFrame::Dispatch { target } => {
            if let Err(err) = agent.dispatch(target) {
                warn!(agent = %ctx.name, error = %err, "remote dispatch rejected");
            }
        }
        // Lifecycle frames run detached: stop joins the poller itself.
        ControlFrame::Stop => {
            tokio::spawn(async move {
                let _ = agent.stop().await;
            });
        }
        ControlFrame::Restart => {
            tokio::spawn(async move {
                let _ = agent.restart().await;
            });
        }
        ControlFrame::EmergencyStop => agent.emergency_stop(),
        ControlFrame::StatusRequest => {
            let report = agent.report();
            match ControlFrame::status(&ctx.name, &report).and_then(|f| f.to_bytes()) {
                Ok(bytes) => {
                    if let Err(err) = ctx.connection.send(&bytes).await {
                        warn!(agent = %ctx.name, error = %err, "status send failed");
                    }
                }
                Err(err) => warn!(agent = %ctx.name, error = %err, "status encode failed"),
            }
        }
        ControlFrame::Heartbeat { .. } | ControlFrame::Status { .. } => {}
    }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTransport;
    use crate::test_support::{online_agent, test_config, wait_until, StubPayload, StubResolver};

    #[tokio::test]
    async fn lifecycle_is_idempotent() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let agent = online_agent("idem", 2, resolver).await;
        assert_eq!(agent.state(), AgentState::Online);

        // Second initialize is a no-op success.
        agent.initialize().await.unwrap();
        assert_eq!(agent.state(), AgentState::Online);

        agent.stop().await.unwrap();
        assert_eq!(agent.state(), AgentState::Offline);
        agent.stop().await.unwrap();
        assert_eq!(agent.state(), AgentState::Offline);

        // Stop then initialize always returns to Online when the transport
        // cooperates.
        agent.initialize().await.unwrap();
        assert_eq!(agent.state(), AgentState::Online);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn transport_failure_marks_the_agent_failed() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let transport = Arc::new(LoopbackTransport::refusing());
        let agent = Agent::new(test_config("unlucky", 1), resolver, transport.clone()).unwrap();

        match agent.initialize().await {
            Err(SwarmError::Connection { .. }) => {}
            other => panic!("expected Connection error, got {other:?}"),
        }
        assert_eq!(agent.state(), AgentState::Failed);
        assert_eq!(agent.active_targets(), 0);

        // Recovery is caller-driven: restart succeeds once the endpoint
        // accepts again.
        transport.accept();
        agent.restart().await.unwrap();
        assert_eq!(agent.state(), AgentState::Online);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn restart_fails_atomically_on_connect_failure() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let transport = Arc::new(LoopbackTransport::new());
        let agent = Agent::new(test_config("flaky", 1), resolver, transport.clone()).unwrap();
        agent.initialize().await.unwrap();

        transport.refuse();
        assert!(agent.restart().await.is_err());
        assert_eq!(agent.state(), AgentState::Failed);
    }

    #[tokio::test]
    async fn dispatch_is_rejected_off_line() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let agent = Agent::new(
            test_config("parked", 1),
            resolver,
            Arc::new(LoopbackTransport::new()),
        )
        .unwrap();

        let target = Target::new("203.0.113.9:80", "stub", 1, Duration::ZERO);
        match agent.dispatch(target) {
            Err(SwarmError::Rejected { operation, state }) => {
                assert_eq!(operation, "dispatch");
                assert_eq!(state, "offline");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert_eq!(agent.state(), AgentState::Offline);
    }

    #[tokio::test]
    async fn unknown_payload_is_rejected_at_dispatch_time() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let agent = online_agent("choosy", 1, resolver).await;
        let target = Target::new("203.0.113.9:80", "ghost", 1, Duration::ZERO);
        assert!(matches!(
            agent.dispatch(target),
            Err(SwarmError::PayloadNotFound { .. })
        ));
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn targets_start_in_fifo_order() {
        let payload = StubPayload::new("stub", 2, Duration::from_millis(5));
        let resolver = StubResolver::with(vec![payload.clone()]);
        // One worker serializes pickup, which is what makes start order
        // observable.
        let agent = online_agent("fifo", 1, resolver).await;

        for address in ["first:1", "second:2", "third:3"] {
            agent
                .dispatch(Target::new(address, "stub", 1, Duration::ZERO))
                .unwrap();
        }

        assert!(
            wait_until(Duration::from_secs(2), || payload.started().len() == 3).await,
            "all targets should have started"
        );
        assert_eq!(payload.started(), vec!["first:1", "second:2", "third:3"]);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_dispatches_never_lose_targets() {
        let blocking = StubPayload::blocking("blocker");
        let instant = StubPayload::instant("stub");
        let resolver = StubResolver::with(vec![blocking, instant.clone()]);
        let agent = online_agent("busy", 2, resolver).await;

        // Occupy both workers so everything else stays queued.
        let blockers: Vec<Target> = (0..2)
            .map(|i| Target::new(format!("blocker:{i}"), "blocker", 1, Duration::from_secs(60)))
            .collect();
        for blocker in &blockers {
            agent.dispatch(blocker.clone()).unwrap();
        }
        assert!(wait_until(Duration::from_secs(2), || agent.active_targets() == 2).await);

        let mut handles = Vec::new();
        for i in 0..20 {
            let agent = agent.clone();
            handles.push(tokio::spawn(async move {
                agent.dispatch(Target::new(
                    format!("queued:{i}"),
                    "stub",
                    1,
                    Duration::ZERO,
                ))
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(agent.queued(), 20);
        assert_eq!(agent.state(), AgentState::Dispatching);

        // Queue-level cancellation removes them without touching the
        // in-flight blockers.
        assert_eq!(agent.cancel_current(), 20);
        assert_eq!(agent.queued(), 0);
        assert_eq!(agent.active_targets(), 2);
        for blocker in &blockers {
            assert!(!blocker.is_cancelled());
        }

        for blocker in &blockers {
            blocker.cancel();
        }
        assert!(
            wait_until(Duration::from_secs(2), || {
                agent.state() == AgentState::Online
            })
            .await
        );
        // The cancelled targets were removed before any worker touched them.
        assert!(instant.started().is_empty());
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn in_flight_token_stops_a_worker_within_one_iteration() {
        let blocking = StubPayload::blocking("blocker");
        let resolver = StubResolver::with(vec![blocking]);
        let agent = online_agent("cancellable", 1, resolver).await;

        let target = Target::new("203.0.113.9:80", "blocker", 1, Duration::from_secs(60));
        let token = target.cancel_token();
        agent.dispatch(target).unwrap();
        assert!(wait_until(Duration::from_secs(2), || agent.active_targets() == 1).await);

        assert!(token.cancel());
        assert!(
            wait_until(Duration::from_secs(2), || {
                agent.active_targets() == 0 && agent.state() == AgentState::Online
            })
            .await,
            "cancelled worker should drain promptly"
        );
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn counters_stay_balanced_under_load() {
        let payload = StubPayload::new("stub", 5, Duration::ZERO);
        let resolver = StubResolver::with(vec![payload]);
        let agent = online_agent("counting", 3, resolver).await;

        for i in 0..12 {
            agent
                .dispatch(Target::new(format!("t:{i}"), "stub", 1, Duration::ZERO))
                .unwrap();
        }
        assert!(
            wait_until(Duration::from_secs(2), || {
                agent.state() == AgentState::Online && agent.report().total_requests >= 60
            })
            .await
        );

        let report = agent.report();
        assert_eq!(
            report.total_requests,
            report.successful_requests + report.failed_requests
        );
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn emergency_stop_fails_fast_and_cancels_in_flight() {
        let blocking = StubPayload::blocking("blocker");
        let resolver = StubResolver::with(vec![blocking]);
        let agent = online_agent("doomed", 2, resolver).await;

        let target = Target::new("203.0.113.9:80", "blocker", 1, Duration::from_secs(60));
        let token = target.cancel_token();
        agent.dispatch(target).unwrap();
        agent
            .dispatch(Target::new("203.0.113.10:80", "blocker", 1, Duration::from_secs(60)))
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || agent.active_targets() == 2).await);

        agent.emergency_stop();
        // Failed immediately, before the workers have joined.
        assert_eq!(agent.state(), AgentState::Failed);
        assert!(token.is_cancelled());
        assert!(
            wait_until(Duration::from_secs(2), || agent.active_targets() == 0).await,
            "workers should drain asynchronously"
        );
        assert!(!agent.report().is_dispatching);
    }

    #[tokio::test]
    async fn maintenance_parks_the_agent() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let agent = online_agent("parked", 1, resolver).await;

        agent.activate_maintenance().await.unwrap();
        assert_eq!(agent.state(), AgentState::Maintenance);
        assert!(agent
            .dispatch(Target::new("a:1", "stub", 1, Duration::ZERO))
            .is_err());

        // Maintenance is left through initialize, without reconnecting.
        agent.initialize().await.unwrap();
        assert_eq!(agent.state(), AgentState::Online);
        agent
            .dispatch(Target::new("a:1", "stub", 1, Duration::ZERO))
            .unwrap();
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn config_updates_only_while_down() {
        let resolver = StubResolver::with(vec![StubPayload::instant("stub")]);
        let agent = online_agent("configurable", 1, resolver).await;

        let mut config = test_config("configurable", 4);
        assert!(matches!(
            agent.update_config(config.clone()).await,
            Err(SwarmError::Rejected { .. })
        ));

        agent.stop().await.unwrap();
        agent.update_config(config.clone()).await.unwrap();
        assert_eq!(agent.config().worker_pool_size, 4);

        config.worker_pool_size = 0;
        assert!(matches!(
            agent.update_config(config).await,
            Err(SwarmError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn dispatch_default_uses_the_configured_payload() {
        let payload = StubPayload::instant("stub");
        let resolver = StubResolver::with(vec![payload.clone()]);
        let agent = online_agent("defaulting", 1, resolver).await;

        agent
            .dispatch_default("203.0.113.77:443", 1, Duration::ZERO)
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || !payload.started().is_empty()).await);
        assert_eq!(payload.started(), vec!["203.0.113.77:443".to_string()]);
        assert!(
            wait_until(Duration::from_secs(2), || {
                agent.report().current_target.is_none()
            })
            .await,
            "drain should clear the current target"
        );
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn control_frames_drive_the_agent() {
        let payload = StubPayload::instant("stub");
        let resolver = StubResolver::with(vec![payload.clone()]);
        let transport = Arc::new(LoopbackTransport::new());
        let agent = Agent::new(test_config("remote", 1), resolver, transport.clone()).unwrap();
        agent.initialize().await.unwrap();

        let channel = transport.channels().pop().unwrap();
        let frame = ControlFrame::Dispatch {
            target: Target::new("203.0.113.5:80", "stub", 1, Duration::ZERO),
        };
        channel.push_inbound(frame.to_bytes().unwrap());

        assert!(
            wait_until(Duration::from_secs(3), || !payload.started().is_empty()).await,
            "poller should apply the dispatch frame"
        );

        channel.push_inbound(ControlFrame::StatusRequest.to_bytes().unwrap());
        assert!(
            wait_until(Duration::from_secs(3), || {
                channel.sent_frames().iter().any(|bytes| {
                    matches!(
                        ControlFrame::from_bytes(bytes),
                        Ok(ControlFrame::Status { .. })
                    )
                })
            })
            .await,
            "poller should answer a status request"
        );
        agent.stop().await.unwrap();
    }
}
