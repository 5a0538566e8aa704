use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter from RUST_LOG when set, otherwise from the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Log file for this process: LOG_FILE if set, else `default_file`.
pub fn log_file_path(config: &LoggingConfig, default_file: &str) -> PathBuf {
    config
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_file))
}

/// Install the global subscriber: an append-mode log file plus, optionally,
/// the console.
pub fn init_logging(config: &LoggingConfig, default_file: &str) -> Result<PathBuf> {
    let path = log_file_path(config, default_file);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false);

    let console_layer = config
        .console_log
        .then(|| fmt::layer().with_target(false).with_thread_ids(true));

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(path)
}
