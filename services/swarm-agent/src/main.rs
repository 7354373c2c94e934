//! # Swarm Agent
//!
//! Daemon hosting a single dispatch agent behind an HTTP control surface.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use dispatch_engine::{Agent, LoopbackTransport};
use payload_engine::builtin_registry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{endpoints, AgentConfig, Target, BUILD_INFO};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

#[derive(Parser)]
#[command(name = "swarm-agent")]
#[command(about = "Swarm Agent - single-agent dispatch daemon")]
#[command(version = swarm_core::VERSION)]
struct Args {
    /// Agent name
    #[arg(long, default_value = "solo")]
    name: String,
    /// HTTP bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,
    /// Control-plane endpoint host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Control-plane endpoint port
    #[arg(long, default_value_t = 9000)]
    port: u16,
    /// Worker pool size
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Default payload identifier
    #[arg(long, default_value = "ddos")]
    payload: String,
}

#[derive(Clone)]
struct AppState {
    agent: Arc<Agent>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    info!("Starting Swarm Agent {}", BUILD_INFO);

    let mut config = AgentConfig::new(args.name, args.host, args.port, args.payload);
    config.worker_pool_size = args.workers;

    let registry = Arc::new(builtin_registry());
    let transport = Arc::new(LoopbackTransport::new());
    let agent = Agent::new(config, registry, transport)?;
    if let Err(err) = agent.initialize().await {
        warn!(error = %err, "initial connect failed; POST /api/v1/restart to retry");
    }

    let state = AppState { agent };
    let app = Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::METRICS, get(metrics_route))
        .route(endpoints::API_V1_REPORT, get(report))
        .route(endpoints::API_V1_DISPATCH, post(dispatch))
        .route("/api/v1/start", post(start))
        .route("/api/v1/stop", post(stop))
        .route("/api/v1/restart", post(restart))
        .route("/api/v1/emergency-stop", post(emergency_stop))
        .route("/api/v1/cancel", post(cancel))
        .route("/api/v1/config", get(config_route))
        .with_state(state);

    let listener = TcpListener::bind(&args.bind).await?;
    info!("Swarm Agent listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[instrument(skip_all)]
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "swarm-agent",
        "version": swarm_core::VERSION
    }))
}

#[instrument(skip_all)]
async fn metrics_route(State(state): State<AppState>) -> Json<Value> {
    let report = state.agent.report();
    Json(json!({
        "service": "swarm-agent",
        "state": report.state,
        "total_requests": report.total_requests,
        "successful_requests": report.successful_requests,
        "failed_requests": report.failed_requests,
        "uptime_ratio": report.uptime_ratio,
    }))
}

#[instrument(skip_all)]
async fn report(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "agent": state.agent.report() }))
}

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    address: String,
    payload_id: Option<String>,
    #[serde(default = "default_intensity")]
    intensity: u32,
    #[serde(default)]
    duration_secs: u64,
}

fn default_intensity() -> u32 {
    1
}

#[instrument(skip_all, fields(address = %request.address))]
async fn dispatch(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> (StatusCode, Json<Value>) {
    let payload_id = request
        .payload_id
        .unwrap_or_else(|| state.agent.default_payload());
    let target = Target::new(
        request.address,
        payload_id,
        request.intensity,
        Duration::from_secs(request.duration_secs),
    );
    match state.agent.dispatch(target) {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "accepted", "dispatch_id": id })),
        ),
        Err(err) => (
            StatusCode::CONFLICT,
            Json(json!({ "status": "rejected", "error": err.to_string() })),
        ),
    }
}

#[instrument(skip_all)]
async fn start(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    lifecycle_response("started", state.agent.initialize().await)
}

#[instrument(skip_all)]
async fn stop(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    lifecycle_response("stopped", state.agent.stop().await)
}

#[instrument(skip_all)]
async fn restart(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    lifecycle_response("restarted", state.agent.restart().await)
}

#[instrument(skip_all)]
async fn emergency_stop(State(state): State<AppState>) -> Json<Value> {
    state.agent.emergency_stop();
    Json(json!({ "status": "emergency_stopped" }))
}

#[instrument(skip_all)]
async fn cancel(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.agent.cancel_current();
    Json(json!({ "status": "cancelled", "cleared": cleared }))
}

#[instrument(skip_all)]
async fn config_route(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "config": &*state.agent.config() }))
}

fn lifecycle_response(verb: &str, result: swarm_core::Result<()>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": verb }))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "failed", "error": err.to_string() })),
        ),
    }
}
