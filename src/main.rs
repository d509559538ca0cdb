mod acquire;
mod agent;
mod bridge;
mod command;
mod config;
mod error;
mod identity;
mod platform;
mod registration;
mod reports;
mod rpc;
mod update;

use agent::Agent;
use config::AgentConfig;
use rpc::HttpRpcClient;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    let config = AgentConfig::from_env();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    info!("Lab agent starting from {}", config.agent_dir.display());
    info!("  API: {}", config.api_base_url);
    info!("  Lab: {}  deployment: {:?}", config.lab_id, config.deployment);

    let rpc = match HttpRpcClient::new(&config.api_base_url) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build API client: {}", e);
            std::process::exit(1);
        }
    };
    let system = platform::detect();

    let agent = Agent::new(config, rpc, system);
    tokio::select! {
        _ = agent.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }
}
