use clap::{Parser, Subcommand};
use serde_json::Value;
use swarm_core::endpoints;

#[derive(Parser)]
#[command(name = "swarm")]
#[command(about = "Swarm CLI - fleet and agent management")]
#[command(version = swarm_core::VERSION)]
struct Cli {
    /// Base URL of the fleet daemon
    #[arg(long, global = true, default_value = "http://localhost:8081")]
    fleet_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Agent management commands
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Fleet-wide lifecycle commands
    Fleet {
        #[command(subcommand)]
        action: FleetAction,
    },
    /// Dispatch a coordinated target to every online agent
    Dispatch {
        /// Destination address ("host:port")
        address: String,
        /// Payload identifier
        #[arg(long)]
        payload: String,
        /// Iteration-count multiplier
        #[arg(long, default_value_t = 1)]
        intensity: u32,
        /// Duration bound in seconds (0 runs a single burst)
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
    /// Fleet status and monitoring
    Status,
}

#[derive(Subcommand)]
enum AgentAction {
    /// List all agents
    List,
    /// Show one agent's report
    Show { name: String },
    /// Start an agent
    Start { name: String },
    /// Stop an agent
    Stop { name: String },
    /// Restart an agent
    Restart { name: String },
}

#[derive(Subcommand)]
enum FleetAction {
    /// Start every agent
    Start,
    /// Stop every agent
    Stop,
    /// Restart every agent
    Restart,
    /// Emergency-stop every agent
    EmergencyStop,
    /// Clear queued targets on every agent
    Cancel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Agent { action } => handle_agent_action(&client, &cli.fleet_url, action).await,
        Commands::Fleet { action } => handle_fleet_action(&client, &cli.fleet_url, action).await,
        Commands::Dispatch {
            address,
            payload,
            intensity,
            duration,
        } => handle_dispatch(&client, &cli.fleet_url, address, payload, intensity, duration).await,
        Commands::Status => handle_status(&client, &cli.fleet_url).await,
    }
}

async fn handle_agent_action(
    client: &reqwest::Client,
    base: &str,
    action: AgentAction,
) -> anyhow::Result<()> {
    match action {
        AgentAction::List => {
            let report: Value = client
                .get(format!("{base}{}", endpoints::API_V1_AGENTS))
                .send()
                .await?
                .json()
                .await?;
            println!("🤖 Fleet agents");
            if let Some(agents) = report.get("agents").and_then(Value::as_array) {
                for agent in agents {
                    println!(
                        "   {:<12} {:<12} total={} ok={} failed={}",
                        field_str(agent, "name"),
                        field_str(agent, "state"),
                        agent["total_requests"],
                        agent["successful_requests"],
                        agent["failed_requests"],
                    );
                }
            }
        }
        AgentAction::Show { name } => {
            let report: Value = client
                .get(format!("{base}{}/{name}", endpoints::API_V1_AGENTS))
                .send()
                .await?
                .json()
                .await?;
            println!("🔍 Agent {name}");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        AgentAction::Start { name } => {
            post_and_print(
                client,
                &format!("{base}{}/{name}/start", endpoints::API_V1_AGENTS),
                &format!("🚀 Starting agent {name}"),
            )
            .await?;
        }
        AgentAction::Stop { name } => {
            post_and_print(
                client,
                &format!("{base}{}/{name}/stop", endpoints::API_V1_AGENTS),
                &format!("🛑 Stopping agent {name}"),
            )
            .await?;
        }
        AgentAction::Restart { name } => {
            post_and_print(
                client,
                &format!("{base}{}/{name}/restart", endpoints::API_V1_AGENTS),
                &format!("🔄 Restarting agent {name}"),
            )
            .await?;
        }
    }
    Ok(())
}

async fn handle_fleet_action(
    client: &reqwest::Client,
    base: &str,
    action: FleetAction,
) -> anyhow::Result<()> {
    let (path, banner) = match action {
        FleetAction::Start => ("/api/v1/start", "🚀 Starting the fleet"),
        FleetAction::Stop => ("/api/v1/stop", "🛑 Stopping the fleet"),
        FleetAction::Restart => ("/api/v1/restart", "🔄 Restarting the fleet"),
        FleetAction::EmergencyStop => ("/api/v1/emergency-stop", "🚨 EMERGENCY STOP"),
        FleetAction::Cancel => ("/api/v1/cancel", "🧹 Cancelling queued targets"),
    };
    post_and_print(client, &format!("{base}{path}"), banner).await
}

async fn handle_dispatch(
    client: &reqwest::Client,
    base: &str,
    address: String,
    payload: String,
    intensity: u32,
    duration: u64,
) -> anyhow::Result<()> {
    println!("🎯 Dispatching {payload} against {address}");
    let body = serde_json::json!({
        "address": address,
        "payload_id": payload,
        "intensity": intensity,
        "duration_secs": duration,
    });
    let response: Value = client
        .post(format!("{base}{}", endpoints::API_V1_DISPATCH))
        .json(&body)
        .send()
        .await?
        .json()
        .await?;
    print_outcome(&response);
    Ok(())
}

async fn handle_status(client: &reqwest::Client, base: &str) -> anyhow::Result<()> {
    let report: Value = client
        .get(format!("{base}{}", endpoints::API_V1_AGENTS))
        .send()
        .await?
        .json()
        .await?;
    println!("📊 Swarm Fleet Status");
    println!(
        "   agents={} active={} total_requests={}",
        report["total_agents"], report["active_agents"], report["total_requests"]
    );
    if let Some(agents) = report.get("agents").and_then(Value::as_array) {
        for agent in agents {
            println!(
                "🤖 {:<12} {:<12} dispatching={} target={}",
                field_str(agent, "name"),
                field_str(agent, "state"),
                agent["is_dispatching"],
                field_str(agent, "current_target"),
            );
        }
    }
    Ok(())
}

async fn post_and_print(client: &reqwest::Client, url: &str, banner: &str) -> anyhow::Result<()> {
    println!("{banner}");
    let response: Value = client.post(url).send().await?.json().await?;
    print_outcome(&response);
    Ok(())
}

fn print_outcome(response: &Value) {
    match response.get("all_succeeded") {
        Some(Value::Bool(true)) => println!("✅ all agents succeeded"),
        Some(Value::Bool(false)) => {
            println!(
                "⚠️  partial failure: {} ok, {} failed",
                response["succeeded"], response["failed"]
            );
            if let Some(outcomes) = response.get("outcomes").and_then(Value::as_array) {
                for outcome in outcomes.iter().filter(|o| o["success"] == false) {
                    println!(
                        "   ❌ {}: {}",
                        field_str(outcome, "agent"),
                        field_str(outcome, "error")
                    );
                }
            }
        }
        _ => println!("{}", serde_json::to_string_pretty(response).unwrap_or_default()),
    }
}

fn field_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("-")
}
