//! Print live trade prints for a few symbols.
//!
//! Usage:  cargo run --bin trade_tape -- --symbol AAPL --symbol MSFT --count 20

use alpaca_trader::config::Config;
use alpaca_trader::feeds::market_trades::{DataFeed, MarketTradesFeed};
use alpaca_trader::telemetry::init_logging;

use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Stream trade prints from the market data feed")]
struct Args {
    /// Symbol to subscribe to (repeatable)
    #[arg(short, long, required = true)]
    symbol: Vec<String>,

    /// Data feed: iex or sip
    #[arg(long, default_value = "iex")]
    feed: DataFeed,

    /// Stop after this many prints
    #[arg(short, long)]
    count: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default();
    init_logging(&config.logging, "trade_tape.log")?;
    config.validate()?;

    let feed = MarketTradesFeed::new(&config.broker, args.feed, args.symbol);
    let limit = args.count;
    let mut seen = 0usize;

    let tape = feed.run(|print| {
        seen += 1;
        println!(
            "{} {} {} x {} [{}]",
            print.timestamp.format("%H:%M:%S%.3f"),
            print.symbol,
            print.price,
            print.size,
            print.exchange.as_deref().unwrap_or("-")
        );
        limit.map_or(true, |max| seen < max)
    });

    tokio::select! {
        result = tape => result?,
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
    }
    Ok(())
}
