//! # Swarm Fleet
//!
//! Daemon hosting the whole fleet: roster from an injected config source,
//! fan-out lifecycle and dispatch routes, aggregated reporting.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use dispatch_engine::{Fleet, FleetOutcome, LoopbackTransport};
use payload_engine::builtin_registry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{
    default_roster, endpoints, AgentConfig, StaticConfigSource, Target, BUILD_INFO,
};
use tokio::net::TcpListener;
use tracing::{info, instrument};

#[derive(Parser)]
#[command(name = "swarm-fleet")]
#[command(about = "Swarm Fleet - coordinated agent management daemon")]
#[command(version = swarm_core::VERSION)]
struct Args {
    /// HTTP bind address
    #[arg(long, default_value = "0.0.0.0:8081")]
    bind: String,
    /// Optional JSON roster file; defaults to the built-in reference roster
    #[arg(long)]
    roster: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    fleet: Arc<Fleet>,
}

fn load_roster(path: Option<&PathBuf>) -> anyhow::Result<Vec<AgentConfig>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let configs: Vec<AgentConfig> = serde_json::from_str(&raw)?;
            info!(count = configs.len(), roster = %path.display(), "roster loaded from file");
            Ok(configs)
        }
        None => Ok(default_roster()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    info!("Starting Swarm Fleet {}", BUILD_INFO);

    let source = StaticConfigSource::new(load_roster(args.roster.as_ref())?);
    let registry = Arc::new(builtin_registry());
    let transport = Arc::new(LoopbackTransport::new());
    let fleet = Arc::new(Fleet::from_source(&source, registry, transport)?);

    let outcome = fleet.initialize_all().await;
    info!(
        online = outcome.succeeded(),
        total = fleet.len(),
        "fleet initialized"
    );

    let state = AppState { fleet };
    let app = Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::METRICS, get(metrics_route))
        .route(endpoints::API_V1_AGENTS, get(list_agents))
        .route("/api/v1/agents/{name}", get(get_agent))
        .route("/api/v1/agents/{name}/start", post(start_agent))
        .route("/api/v1/agents/{name}/stop", post(stop_agent))
        .route("/api/v1/agents/{name}/restart", post(restart_agent))
        .route(endpoints::API_V1_DISPATCH, post(dispatch_all))
        .route("/api/v1/start", post(start_all))
        .route("/api/v1/stop", post(stop_all))
        .route("/api/v1/restart", post(restart_all))
        .route("/api/v1/emergency-stop", post(emergency_stop_all))
        .route("/api/v1/cancel", post(cancel_all))
        .with_state(state);

    let listener = TcpListener::bind(&args.bind).await?;
    info!("Swarm Fleet listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[instrument(skip_all)]
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "swarm-fleet",
        "version": swarm_core::VERSION
    }))
}

#[instrument(skip_all)]
async fn metrics_route(State(state): State<AppState>) -> Json<Value> {
    let report = state.fleet.report();
    Json(json!({
        "service": "swarm-fleet",
        "total_agents": report.total_agents,
        "active_agents": report.active_agents,
        "total_requests": report.total_requests,
    }))
}

#[instrument(skip_all)]
async fn list_agents(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.fleet.report()))
}

#[instrument(skip_all, fields(agent = %name))]
async fn get_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.fleet.get(&name) {
        Some(agent) => (StatusCode::OK, Json(json!({ "agent": agent.report() }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Agent not found: {name}") })),
        ),
    }
}

#[instrument(skip_all, fields(agent = %name))]
async fn start_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.fleet.get(&name) {
        Some(agent) => match agent.initialize().await {
            Ok(()) => (StatusCode::OK, Json(json!({ "status": "started" }))),
            Err(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "failed", "error": err.to_string() })),
            ),
        },
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Agent not found: {name}") })),
        ),
    }
}

#[instrument(skip_all, fields(agent = %name))]
async fn stop_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.fleet.get(&name) {
        Some(agent) => match agent.stop().await {
            Ok(()) => (StatusCode::OK, Json(json!({ "status": "stopped" }))),
            Err(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "failed", "error": err.to_string() })),
            ),
        },
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Agent not found: {name}") })),
        ),
    }
}

#[instrument(skip_all, fields(agent = %name))]
async fn restart_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.fleet.get(&name) {
        Some(agent) => match agent.restart().await {
            Ok(()) => (StatusCode::OK, Json(json!({ "status": "restarted" }))),
            Err(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "failed", "error": err.to_string() })),
            ),
        },
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Agent not found: {name}") })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    address: String,
    payload_id: String,
    #[serde(default = "default_intensity")]
    intensity: u32,
    #[serde(default)]
    duration_secs: u64,
}

fn default_intensity() -> u32 {
    1
}

#[instrument(skip_all, fields(address = %request.address, payload = %request.payload_id))]
async fn dispatch_all(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Json<Value> {
    let target = Target::new(
        request.address,
        request.payload_id,
        request.intensity,
        Duration::from_secs(request.duration_secs),
    );
    outcome_response("dispatched", state.fleet.dispatch_to_all(&target).await)
}

#[instrument(skip_all)]
async fn start_all(State(state): State<AppState>) -> Json<Value> {
    outcome_response("started", state.fleet.start_all().await)
}

#[instrument(skip_all)]
async fn stop_all(State(state): State<AppState>) -> Json<Value> {
    outcome_response("stopped", state.fleet.stop_all().await)
}

#[instrument(skip_all)]
async fn restart_all(State(state): State<AppState>) -> Json<Value> {
    outcome_response("restarted", state.fleet.restart_all().await)
}

#[instrument(skip_all)]
async fn emergency_stop_all(State(state): State<AppState>) -> Json<Value> {
    outcome_response("emergency_stopped", state.fleet.emergency_stop_all().await)
}

#[instrument(skip_all)]
async fn cancel_all(State(state): State<AppState>) -> Json<Value> {
    outcome_response("cancelled", state.fleet.cancel_all().await)
}

fn outcome_response(verb: &str, outcome: FleetOutcome) -> Json<Value> {
    Json(json!({
        "status": verb,
        "all_succeeded": outcome.all_succeeded,
        "succeeded": outcome.succeeded(),
        "failed": outcome.failed(),
        "outcomes": outcome.outcomes,
    }))
}
