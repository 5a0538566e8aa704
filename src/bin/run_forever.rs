//! Restart a command whenever it exits.
//!
//! Usage:  run_forever [--restart-delay SECS] [--max-restarts N] <command> [args...]

use alpaca_trader::config::Config;
use alpaca_trader::supervisor::Supervisor;
use alpaca_trader::telemetry::init_logging;

use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Keep a command running, restarting it when it exits")]
struct Args {
    /// Seconds to wait before restarting after a failure
    #[arg(long, default_value_t = 10.0)]
    restart_delay: f64,

    /// Stop after this many restarts (default: never)
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default();
    init_logging(&config.logging, "run_forever.log")?;

    anyhow::ensure!(
        args.restart_delay.is_finite() && args.restart_delay >= 0.0,
        "--restart-delay must be a non-negative number of seconds"
    );

    let mut command = args.command.into_iter();
    let Some(program) = command.next() else {
        anyhow::bail!("no command given");
    };

    let supervisor = Supervisor::new(program, command.collect())
        .restart_delay(Duration::from_secs_f64(args.restart_delay))
        .max_restarts(args.max_restarts);

    let runs = supervisor
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Supervisor finished after {runs} run(s)");
    Ok(())
}
