mod agent;
mod artifact;
mod config;
mod job;
mod logging;
mod module;
mod shadow;
mod task;
mod transport;

#[cfg(test)]
mod testing;

use agent::Agent;
use anyhow::{Context, Result};
use module::InMemoryRuntime;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let path = config::resolve_path(std::env::args().nth(1));
    let config = config::load(path.as_deref()).context("loading agent configuration")?;

    logging::init(&config.log.level)?;
    match &path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No configuration file, using defaults"),
    }
    info!("  Thing: {}", config.identity.thing_name);
    info!("  Shadow update interval: {}ms", config.shadow.update_interval_ms);
    info!("  Supported api version: {}", config.engine.supported_api_version);

    let transport = agent::build_transport(&config.transport);
    let runtime = Arc::new(InMemoryRuntime::new());
    let agent = Agent::start(&config, transport, runtime).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    agent.shutdown().await;
    info!("Edge agent stopped");
    Ok(())
}
