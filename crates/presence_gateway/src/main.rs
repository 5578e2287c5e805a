//! Presence gateway entry point.

use anyhow::{anyhow, Context};
use presence_core::PresenceRuntime;
use presence_gateway::logging::setup_logging;
use presence_gateway::signals::setup_signal_handlers;
use presence_gateway::{AppConfig, CliArgs, GatewayServer};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Configuration is loaded before logging so its level applies.
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .with_context(|| format!("loading {}", args.config_path.display()))?;
    config.apply_cli(&args);
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

    setup_logging(&config.logging)?;

    let world = &config.world;
    info!(
        config = %args.config_path.display(),
        bind = %config.server.bind_address,
        depth = world.depth,
        width = world.bounds.width(),
        height = world.bounds.height(),
        max_connections = config.server.max_connections,
        "Starting presence gateway"
    );

    let runtime = Arc::new(PresenceRuntime::new(config.world.clone()).map_err(|e| anyhow!(e))?);
    let server = GatewayServer::new(config.server.clone(), runtime);
    let shutdown = server.shutdown_handle();
    let listener = server.bind().await?;

    let server_task = tokio::spawn(async move { server.serve(listener).await });

    if let Err(e) = setup_signal_handlers().await {
        error!("Signal handling failed, shutting down: {}", e);
    }
    let _ = shutdown.send(());

    server_task.await.context("server task panicked")??;
    info!("Presence gateway stopped");
    Ok(())
}
