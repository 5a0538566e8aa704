//! Collects order execution events from the trading stream and forwards each
//! order to the relay.
//!
//! Usage:  cargo run --bin streamer

use alpaca_trader::config::Config;
use alpaca_trader::feeds::trade_updates::TradeUpdatesFeed;
use alpaca_trader::relay::{forward_updates, RelayClient};
use alpaca_trader::telemetry::init_logging;

use tokio::sync::broadcast;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_or_default();
    init_logging(&config.logging, "streamer.log")?;
    config.validate()?;

    let feed = TradeUpdatesFeed::new(&config.broker)?;
    let updates = feed.subscribe();
    let relay = RelayClient::new(config.relay.addr.clone());
    info!("Forwarding trade updates to relay at {}", relay.addr());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handle = feed.start(&shutdown_tx);

    let stats = forward_updates(updates, &relay, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await;

    info!(
        "Shutting down streamer ({} forwarded, {} relay failures)",
        stats.forwarded, stats.failed
    );
    let _ = shutdown_tx.send(());
    let _ = handle.await;
    Ok(())
}
