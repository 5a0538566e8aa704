//! Print the account levels and optionally append them to a file.
//!
//! Usage:  cargo run --bin levels -- my-levels.txt

use alpaca_trader::config::Config;
use alpaca_trader::execution::AlpacaClient;
use alpaca_trader::reports::{append_report, render_levels};
use alpaca_trader::telemetry::init_logging;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Print account levels")]
struct Args {
    /// Append the report to this file
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default();
    init_logging(&config.logging, "reports.log")?;
    config.validate()?;

    let client = AlpacaClient::new(&config.broker)?;
    let account = client.get_account().await?;
    let report = render_levels(&account, chrono::Local::now());

    println!("{report}");

    if let Some(path) = args.file {
        append_report(&path, &report)
            .with_context(|| format!("failed to append to {}", path.display()))?;
    }
    Ok(())
}
