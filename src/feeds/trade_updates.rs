use crate::config::BrokerConfig;
use crate::feeds::backoff::ExponentialBackoff;
use crate::models::trade_update::TradeUpdate;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// WebSocket client for the broker's trading stream.
///
/// Authenticates with the API key pair, listens on `trade_updates` and
/// broadcasts every order event (new, fill, partial_fill, canceled, ...).
///
/// WS endpoint: wss://paper-api.alpaca.markets/stream (live: wss://api.alpaca.markets/stream)
pub struct TradeUpdatesFeed {
    url: String,
    api_key: String,
    api_secret: String,
    update_tx: broadcast::Sender<TradeUpdate>,
}

/// Envelope of every stream message: `{"stream": "...", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct RawStreamMessage {
    stream: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Authorized,
    Unauthorized(String),
    Listening(Vec<String>),
    TradeUpdate(Box<TradeUpdate>),
    Other(String),
}

/// How a connection ended.
enum SessionEnd {
    Shutdown,
    Disconnected,
}

impl TradeUpdatesFeed {
    pub fn new(config: &BrokerConfig) -> Result<Self, url::ParseError> {
        Ok(Self::with_url(config, config.stream_url()?.as_str()))
    }

    pub fn with_url(config: &BrokerConfig, url: &str) -> Self {
        let (update_tx, _) = broadcast::channel(256);
        Self {
            url: url.to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            update_tx,
        }
    }

    /// Subscribe to trade updates.
    pub fn subscribe(&self) -> broadcast::Receiver<TradeUpdate> {
        self.update_tx.subscribe()
    }

    /// Decode a text (or binary, as the paper endpoint sends) frame.
    pub fn parse_message(text: &str) -> Result<StreamMessage, serde_json::Error> {
        let raw: RawStreamMessage = serde_json::from_str(text)?;
        let message = match raw.stream.as_str() {
            "authorization" => {
                let status = raw.data.get("status").and_then(Value::as_str).unwrap_or("");
                if status == "authorized" {
                    StreamMessage::Authorized
                } else {
                    StreamMessage::Unauthorized(status.to_string())
                }
            }
            "listening" => {
                let streams = raw
                    .data
                    .get("streams")
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|s| s.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                StreamMessage::Listening(streams)
            }
            "trade_updates" => {
                let raw_order = raw.data.get("order").cloned().unwrap_or_default();
                let mut update: TradeUpdate = serde_json::from_value(raw.data)?;
                update.raw_order = raw_order;
                StreamMessage::TradeUpdate(Box::new(update))
            }
            other => StreamMessage::Other(other.to_string()),
        };
        Ok(message)
    }

    /// Start the stream connection with reconnection logic.
    pub fn start(&self, shutdown_tx: &broadcast::Sender<()>) -> JoinHandle<()> {
        let url = self.url.clone();
        let auth_msg = json!({
            "action": "authenticate",
            "data": {"key_id": self.api_key, "secret_key": self.api_secret},
        });
        let update_tx = self.update_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut backoff = ExponentialBackoff::default();

            loop {
                info!("Connecting to trade updates stream: {url}");

                let conn = tokio::select! {
                    result = connect_async(url.as_str()) => result,
                    _ = shutdown_rx.recv() => {
                        info!("Trade updates feed shutdown");
                        return;
                    }
                };

                match conn {
                    Ok((ws_stream, _)) => {
                        info!("Trade updates stream connected");
                        let end = Self::run_session(
                            ws_stream,
                            &auth_msg,
                            &update_tx,
                            &mut backoff,
                            &mut shutdown_rx,
                        )
                        .await;
                        if let SessionEnd::Shutdown = end {
                            info!("Trade updates feed shutdown");
                            return;
                        }
                    }
                    Err(e) => {
                        error!("Trade updates connect failed: {e}");
                    }
                }

                let delay = backoff.next_delay();
                warn!("Trade updates reconnecting in {}ms...", delay.as_millis());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.recv() => return,
                }
            }
        })
    }

    async fn run_session<S>(
        ws_stream: tokio_tungstenite::WebSocketStream<S>,
        auth_msg: &Value,
        update_tx: &broadcast::Sender<TradeUpdate>,
        backoff: &mut ExponentialBackoff,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> SessionEnd
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut write, mut read) = ws_stream.split();

        if let Err(e) = write.send(Message::Text(auth_msg.to_string())).await {
            error!("Failed to send stream authentication: {e}");
            return SessionEnd::Disconnected;
        }

        loop {
            let msg = tokio::select! {
                msg = read.next() => msg,
                _ = shutdown_rx.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            };

            let text = match msg {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Non UTF-8 binary frame: {e}");
                        continue;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!("Trade updates stream closed by server: {frame:?}");
                    return SessionEnd::Disconnected;
                }
                Some(Ok(_)) => continue, // Pong, Frame
                Some(Err(e)) => {
                    warn!("Trade updates stream error: {e}");
                    return SessionEnd::Disconnected;
                }
                None => {
                    warn!("Trade updates stream ended");
                    return SessionEnd::Disconnected;
                }
            };

            match Self::parse_message(&text) {
                Ok(StreamMessage::Authorized) => {
                    info!("Trade updates stream authorized");
                    backoff.reset();
                    let listen = json!({
                        "action": "listen",
                        "data": {"streams": ["trade_updates"]},
                    });
                    if let Err(e) = write.send(Message::Text(listen.to_string())).await {
                        error!("Failed to listen on trade_updates: {e}");
                        return SessionEnd::Disconnected;
                    }
                }
                Ok(StreamMessage::Unauthorized(status)) => {
                    error!("Trade updates stream authorization failed: status={status}");
                    return SessionEnd::Disconnected;
                }
                Ok(StreamMessage::Listening(streams)) => {
                    info!("Listening on {streams:?}");
                }
                Ok(StreamMessage::TradeUpdate(update)) => {
                    debug!(
                        "Trade update: event={:?} order={} status={:?}",
                        update.event, update.order.id, update.order.status
                    );
                    // No receivers is fine; updates are only broadcast
                    let _ = update_tx.send(*update);
                }
                Ok(StreamMessage::Other(stream)) => {
                    debug!("Ignoring message on stream {stream}");
                }
                Err(e) => {
                    warn!("Unparseable stream message ({e}): {text}");
                }
            }
        }
    }
}
