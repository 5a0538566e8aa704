//! Pull all orders for one day and append them to a CSV file.
//!
//! Usage:  cargo run --bin day_executions -- --output my_file.csv --date 2020-07-24

use alpaca_trader::config::Config;
use alpaca_trader::execution::AlpacaClient;
use alpaca_trader::reports::{append_csv, orders_query};
use alpaca_trader::telemetry::init_logging;

use chrono::{NaiveDate, Utc};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Save the day's orders to CSV")]
struct Args {
    /// CSV file to append to; without it orders are only printed
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Day to pull, YYYY-MM-DD (default: today)
    #[arg(short, long)]
    date: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default();
    init_logging(&config.logging, "reports.log")?;
    config.validate()?;

    let date = args.date.unwrap_or_else(|| Utc::now().date_naive());
    let query = orders_query(date)?;
    let client = AlpacaClient::new(&config.broker)?;
    let orders = client.list_orders(&query).await?;
    info!("{} orders on {date}", orders.len());

    for order in &orders {
        println!("{}", serde_json::to_string(order)?);
    }

    if let Some(path) = args.output {
        let written = append_csv(&path, &orders)?;
        info!("Wrote {written} rows to {}", path.display());
    }
    Ok(())
}
