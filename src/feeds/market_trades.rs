use crate::config::BrokerConfig;
use crate::models::trade_update::TradePrint;
use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const DATA_STREAM_HOST: &str = "wss://stream.data.alpaca.markets/v2";

/// Market data source: `iex` is free, `sip` needs a paid subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFeed {
    #[default]
    Iex,
    Sip,
}

impl fmt::Display for DataFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFeed::Iex => f.write_str("iex"),
            DataFeed::Sip => f.write_str("sip"),
        }
    }
}

impl std::str::FromStr for DataFeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iex" => Ok(DataFeed::Iex),
            "sip" => Ok(DataFeed::Sip),
            other => Err(format!("unknown data feed '{other}' (expected iex or sip)")),
        }
    }
}

/// Messages on the market data stream. Each frame is a JSON array of these.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "T")]
pub enum DataMessage {
    #[serde(rename = "success")]
    Success { msg: String },
    #[serde(rename = "error")]
    Error { code: i64, msg: String },
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        trades: Vec<String>,
    },
    #[serde(rename = "t")]
    Trade(TradePrint),
    #[serde(other)]
    Other,
}

/// Real-time trade prints for a set of symbols.
pub struct MarketTradesFeed {
    url: String,
    api_key: String,
    api_secret: String,
    symbols: Vec<String>,
}

impl MarketTradesFeed {
    pub fn new(config: &BrokerConfig, feed: DataFeed, symbols: Vec<String>) -> Self {
        Self {
            url: format!("{DATA_STREAM_HOST}/{feed}"),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            symbols: symbols.into_iter().map(|s| s.to_uppercase()).collect(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn parse_frame(text: &str) -> Result<Vec<DataMessage>, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Connect, authenticate, subscribe and hand every trade print to
    /// `on_trade` until it returns false or the stream ends.
    pub async fn run<F>(&self, mut on_trade: F) -> Result<()>
    where
        F: FnMut(&TradePrint) -> bool,
    {
        info!("Connecting to market data stream: {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect to {}", self.url))?;
        let (mut write, mut read) = ws_stream.split();

        let auth = json!({"action": "auth", "key": self.api_key, "secret": self.api_secret});
        write.send(Message::Text(auth.to_string())).await?;

        while let Some(msg) = read.next().await {
            let text = match msg? {
                Message::Text(text) => text,
                Message::Ping(data) => {
                    write.send(Message::Pong(data)).await?;
                    continue;
                }
                Message::Close(frame) => {
                    warn!("Market data stream closed: {frame:?}");
                    return Ok(());
                }
                _ => continue,
            };

            let messages = match Self::parse_frame(&text) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Unparseable market data frame ({e}): {text}");
                    continue;
                }
            };

            for message in messages {
                match message {
                    DataMessage::Success { msg } if msg == "authenticated" => {
                        info!("Market data stream authenticated");
                        let subscribe = json!({"action": "subscribe", "trades": self.symbols});
                        write.send(Message::Text(subscribe.to_string())).await?;
                    }
                    DataMessage::Success { msg } => debug!("Market data stream: {msg}"),
                    DataMessage::Subscription { trades } => {
                        info!("Subscribed to trades: {trades:?}");
                    }
                    DataMessage::Error { code, msg } => {
                        bail!("market data stream error {code}: {msg}");
                    }
                    DataMessage::Trade(print) => {
                        if !on_trade(&print) {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                    DataMessage::Other => {}
                }
            }
        }

        warn!("Market data stream ended");
        Ok(())
    }
}
