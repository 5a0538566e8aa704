//! Alternating buy/sell trader.
//!
//! Usage:  cargo run --bin alpaca-trader -- --strategy strategy.toml

use alpaca_trader::config::Config;
use alpaca_trader::execution::{AlpacaClient, OrderBuilder};
use alpaca_trader::relay::RelayClient;
use alpaca_trader::strategies::StrategyConfig;
use alpaca_trader::telemetry::{init_logging, AlertManager, EmailSender};
use alpaca_trader::trader::Trader;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Alternate buy and sell orders for one symbol")]
struct Args {
    /// Strategy TOML file (default: STRATEGY_FILE or strategy.toml)
    #[arg(short, long)]
    strategy: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default();
    init_logging(&config.logging, "trader.log")?;

    info!("================================================");
    info!("  Alpaca alternating trader v{}", env!("CARGO_PKG_VERSION"));
    info!("================================================");

    config.validate()?;
    info!(
        "Environment: {}",
        if config.broker.use_sandbox { "paper" } else { "LIVE" }
    );

    let strategy_file = args.strategy.unwrap_or_else(|| config.strategy_file.clone());
    let strategy = StrategyConfig::from_file(&strategy_file)?;
    let builder = OrderBuilder::new(&strategy)
        .with_context(|| format!("unsafe strategy in {}", strategy_file.display()))?;

    let safe = builder.strategy();
    info!("--- Strategy ({}) ---", strategy_file.display());
    info!("  Symbol:        {}", safe.symbol);
    info!("  Quantity:      {}", safe.quantity);
    info!("  First side:    {}", safe.first_order_side);
    info!("  Order type:    {}", safe.order_type);
    info!("  Initial:       {:?}", safe.initial);
    info!("  Loop:          {:?}", safe.loop_prices);

    let broker = AlpacaClient::new(&config.broker)?;
    let mut trader = Trader::new(broker, builder, &config.runtime);

    if config.relay.enabled {
        info!("Reading order status from relay at {}", config.relay.addr);
        trader = trader.with_relay(RelayClient::new(config.relay.addr.clone()));
    }

    let alerts = match config.email.credentials() {
        Some((key, from, to)) => AlertManager::new(Some(EmailSender::new(key)?), from, to),
        None => AlertManager::disabled(),
    };
    trader = trader.with_alerts(alerts);

    trader
        .run_forever(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Trader stopped");
    Ok(())
}
