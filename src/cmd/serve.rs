//! HTTP and WebSocket server — `refinery serve`.

use anyhow::Result;
use refinery::config::Config;

pub async fn cmd_serve(
    mut config: Config,
    port: Option<u16>,
    host: Option<String>,
    cors_permissive: bool,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    config.server.cors_permissive |= cors_permissive;

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let orchestrator = super::build_orchestrator(&config).await?;
    refinery::server::start_server(&config.server, orchestrator).await
}
