//! `agentloop serve`: Start the HTTP API server.

use super::runtime;
use agentloop_config::AppConfig;
use agentloop_gateway::GatewayState;
use std::sync::Arc;

pub async fn run(
    mut config: AppConfig,
    port_override: Option<u16>,
    host_override: Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    let runtime = runtime::build(&config).await?;
    let state = Arc::new(GatewayState {
        orchestrator: runtime.orchestrator,
        splitter: runtime.splitter,
    });

    println!("agentloop gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {} ({})", config.provider.model, config.provider.name);

    agentloop_gateway::start(&config.gateway, state).await?;
    Ok(())
}
