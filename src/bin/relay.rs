//! Order update relay: keeps the latest version of every order written by the
//! streamer and serves it to the trader.
//!
//! Usage:  cargo run --bin relay

use alpaca_trader::config::Config;
use alpaca_trader::relay::RelayServer;
use alpaca_trader::telemetry::init_logging;

use tokio::sync::broadcast;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_or_default();
    init_logging(&config.logging, "relay.log")?;
    config.validate_runtime()?;

    let server = RelayServer::bind(config.relay.bind_addr.as_str()).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("Ctrl+C received");
        let _ = shutdown_tx.send(());
    });

    server.run(shutdown_rx).await?;
    info!("Relay stopped");
    Ok(())
}
