//! Petri Game Server
//!
//! Authoritative world-synchronization server for Petri.

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use petri::{GameServer, ServerConfig, TICK_RATE, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();

    info!("Petri Server v{}", VERSION);
    info!("Tick Rate: {} Hz (period {:?})", TICK_RATE, config.tick_period);
    info!("Player Speed: {} units/s", config.player_speed);

    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!(error = %e, "failed to listen for interrupt"),
        }
    });

    server.run().await?;

    let stats = server.publisher().stats();
    info!(
        frames = stats.frames,
        delivered = stats.delivered,
        dropped = stats.dropped,
        "server stopped"
    );
    Ok(())
}
