use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const PAPER_API: &str = "https://paper-api.alpaca.markets";
const LIVE_API: &str = "https://api.alpaca.markets";

/// Calls to the REST API are capped at 200/minute, i.e. ~3 per second.
pub const MIN_SAFE_UPDATE_SECS: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub logging: LoggingConfig,
    pub runtime: RuntimeConfig,
    pub relay: RelayConfig,
    pub email: EmailConfig,
    pub strategy_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub api_key: String,
    pub api_secret: String,
    pub use_sandbox: bool, // true = paper trading
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_level: String,
    /// Overrides the per-binary default log file.
    pub log_file: Option<PathBuf>,
    pub console_log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub update_time_secs: f64,       // Wait between loop ticks
    pub sleep_after_error_secs: f64, // Wait after a failed tick
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub addr: String,
    pub enabled: bool, // Trader reads order status from the relay
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub sendgrid_api_key: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig {
                api_key: String::new(),
                api_secret: String::new(),
                use_sandbox: true,
            },
            logging: LoggingConfig {
                log_level: "info".into(),
                log_file: None,
                console_log: true,
            },
            runtime: RuntimeConfig {
                update_time_secs: 1.0,
                sleep_after_error_secs: 1.0,
            },
            relay: RelayConfig {
                bind_addr: "0.0.0.0:5555".into(),
                addr: "127.0.0.1:5555".into(),
                enabled: false,
            },
            email: EmailConfig {
                sendgrid_api_key: None,
                from: None,
                to: None,
            },
            strategy_file: PathBuf::from("strategy.toml"),
        }
    }
}

impl BrokerConfig {
    pub fn rest_url(&self) -> &'static str {
        if self.use_sandbox {
            PAPER_API
        } else {
            LIVE_API
        }
    }

    /// Trading stream (`trade_updates`) endpoint for the selected environment.
    pub fn stream_url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(self.rest_url())?;
        // https -> wss stays within the special schemes, so this cannot fail
        let _ = url.set_scheme("wss");
        url.set_path("/stream");
        Ok(url)
    }
}

impl RuntimeConfig {
    pub fn update_time(&self) -> Duration {
        Duration::from_secs_f64(self.update_time_secs.max(0.0))
    }

    pub fn sleep_after_error(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_after_error_secs.max(0.0))
    }
}

impl EmailConfig {
    /// Returns (api_key, from, to) when email is fully configured.
    pub fn credentials(&self) -> Option<(&str, &str, &str)> {
        match (&self.sendgrid_api_key, &self.from, &self.to) {
            (Some(key), Some(from), Some(to)) => Some((key, from, to)),
            _ => None,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Config {
    /// Load configuration from environment variables (.env file) with defaults.
    ///
    /// Broker:
    ///   APCA_API_KEY_ID, APCA_API_SECRET_KEY - API credentials
    ///   USE_SANDBOX - paper trading (default: true)
    ///
    /// Logging:
    ///   LOG_LEVEL (default: info), LOG_FILE, CONSOLE_LOG (default: true)
    ///
    /// Loop timing (seconds):
    ///   UPDATE_TIME (default: 1), SLEEP_AFTER_ERROR (default: 1)
    ///
    /// Relay:
    ///   RELAY_BIND (default: 0.0.0.0:5555), RELAY_ADDR (default: 127.0.0.1:5555),
    ///   USE_RELAY (default: false)
    ///
    /// Email:
    ///   SENDGRID_API_KEY, EMAIL_FROM, EMAIL_TO
    ///
    /// STRATEGY_FILE - strategy TOML (default: strategy.toml)
    pub fn load_or_default() -> Self {
        // Load .env file if present
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparseable values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(key) = lookup("APCA_API_KEY_ID").and_then(non_empty) {
            config.broker.api_key = key;
        }
        if let Some(secret) = lookup("APCA_API_SECRET_KEY").and_then(non_empty) {
            config.broker.api_secret = secret;
        }
        if let Some(sandbox) = lookup("USE_SANDBOX").as_deref().and_then(parse_bool) {
            config.broker.use_sandbox = sandbox;
        }

        if let Some(level) = lookup("LOG_LEVEL").and_then(non_empty) {
            config.logging.log_level = level.to_lowercase();
        }
        if let Some(file) = lookup("LOG_FILE").and_then(non_empty) {
            config.logging.log_file = Some(PathBuf::from(file));
        }
        if let Some(console) = lookup("CONSOLE_LOG").as_deref().and_then(parse_bool) {
            config.logging.console_log = console;
        }

        if let Some(secs) = lookup("UPDATE_TIME").and_then(|v| v.trim().parse().ok()) {
            config.runtime.update_time_secs = secs;
        }
        if let Some(secs) = lookup("SLEEP_AFTER_ERROR").and_then(|v| v.trim().parse().ok()) {
            config.runtime.sleep_after_error_secs = secs;
        }

        if let Some(bind) = lookup("RELAY_BIND").and_then(non_empty) {
            config.relay.bind_addr = bind;
        }
        if let Some(addr) = lookup("RELAY_ADDR").and_then(non_empty) {
            config.relay.addr = addr;
        }
        if let Some(enabled) = lookup("USE_RELAY").as_deref().and_then(parse_bool) {
            config.relay.enabled = enabled;
        }

        config.email.sendgrid_api_key = lookup("SENDGRID_API_KEY").and_then(non_empty);
        config.email.from = lookup("EMAIL_FROM").and_then(non_empty);
        config.email.to = lookup("EMAIL_TO").and_then(non_empty);

        if let Some(path) = lookup("STRATEGY_FILE").and_then(non_empty) {
            config.strategy_file = PathBuf::from(path);
        }

        config
    }

    /// Checks needed before talking to the broker.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.broker.api_key.is_empty() && !self.broker.api_secret.is_empty(),
            "APCA_API_KEY_ID and APCA_API_SECRET_KEY must be set"
        );
        self.validate_runtime()?;
        if !self.broker.use_sandbox {
            tracing::warn!("USE_SANDBOX=false: orders go to the LIVE account");
        }
        Ok(())
    }

    /// Checks that do not involve credentials (relay, supervisor).
    pub fn validate_runtime(&self) -> anyhow::Result<()> {
        let rt = &self.runtime;
        anyhow::ensure!(
            rt.update_time_secs.is_finite() && rt.update_time_secs > 0.0,
            "UPDATE_TIME must be positive, got {}",
            rt.update_time_secs
        );
        anyhow::ensure!(
            rt.sleep_after_error_secs.is_finite() && rt.sleep_after_error_secs > 0.0,
            "SLEEP_AFTER_ERROR must be positive, got {}",
            rt.sleep_after_error_secs
        );
        if rt.update_time_secs < MIN_SAFE_UPDATE_SECS {
            tracing::warn!(
                "UPDATE_TIME={}s is below {MIN_SAFE_UPDATE_SECS}s and may hit the API rate limit",
                rt.update_time_secs
            );
        }
        anyhow::ensure!(
            self.relay.bind_addr.parse::<SocketAddr>().is_ok(),
            "RELAY_BIND is not a socket address: {}",
            self.relay.bind_addr
        );
        anyhow::ensure!(
            !self.relay.addr.is_empty(),
            "RELAY_ADDR must not be empty"
        );
        Ok(())
    }
}
