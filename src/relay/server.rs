use crate::relay::protocol::{RelayRequest, RelaySnapshot, StatusReply};
use crate::relay::RelayError;
use dashmap::DashMap;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Longest request line the relay accepts, newline included.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Latest state of every order written to the relay.
pub struct OrderStore {
    orders: DashMap<String, Value>,
    /// f64 bits of the last update time
    last_updated: AtomicU64,
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            last_updated: AtomicU64::new(unix_now().to_bits()),
        }
    }

    /// Store `order` under its `id`, replacing any previous version.
    pub fn write(&self, order: Value) -> Result<String, RelayError> {
        let id = order
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(RelayError::MissingOrderId)?
            .to_string();
        self.orders.insert(id.clone(), order);
        self.last_updated.store(unix_now().to_bits(), Ordering::Release);
        Ok(id)
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            last_updated: f64::from_bits(self.last_updated.load(Ordering::Acquire)),
            orders: self
                .orders
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Answer one request line. Always produces a reply line.
    pub fn handle_line(&self, line: &str) -> String {
        let reply = match serde_json::from_str::<RelayRequest>(line) {
            Ok(RelayRequest::Read) => serde_json::to_string(&self.snapshot()),
            Ok(RelayRequest::Write { data }) => match self.write(data) {
                Ok(id) => {
                    debug!("Stored order {id}");
                    serde_json::to_string(&StatusReply::ok())
                }
                Err(e) => serde_json::to_string(&StatusReply::error(e.to_string())),
            },
            Err(e) => {
                warn!("Bad relay request: {e}");
                serde_json::to_string(&StatusReply::error(format!("bad request: {e}")))
            }
        };
        reply.unwrap_or_else(|e| format!(r#"{{"status":"error","message":"encode failed: {e}"}}"#))
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

/// TCP relay: one JSON request per line, one JSON reply per line.
pub struct RelayServer {
    listener: TcpListener,
    store: Arc<OrderStore>,
}

impl RelayServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            store: Arc::new(OrderStore::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> Arc<OrderStore> {
        self.store.clone()
    }

    /// Accept connections until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), RelayError> {
        info!("Relay listening on {}", self.listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Relay client connected: {peer}");
                            let store = self.store.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::serve(stream, store).await {
                                    warn!("Relay connection {peer} failed: {e}");
                                }
                                debug!("Relay client disconnected: {peer}");
                            });
                        }
                        Err(e) => {
                            error!("Relay accept failed: {e}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Relay shutting down ({} orders held)", self.store.len());
                    return Ok(());
                }
            }
        }
    }

    async fn serve(stream: TcpStream, store: Arc<OrderStore>) -> Result<(), RelayError> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut buf = Vec::with_capacity(1024);

        loop {
            buf.clear();
            let n = (&mut reader)
                .take(MAX_REQUEST_BYTES as u64 + 1)
                .read_until(b'\n', &mut buf)
                .await?;
            if n == 0 {
                return Ok(());
            }

            let mut reply = if buf.len() > MAX_REQUEST_BYTES {
                warn!("Relay request exceeds {MAX_REQUEST_BYTES} bytes, discarding");
                if buf.last() != Some(&b'\n') {
                    Self::discard_line(&mut reader).await?;
                }
                encode_status(StatusReply::error(format!(
                    "request too large (limit {MAX_REQUEST_BYTES} bytes)"
                )))
            } else {
                match std::str::from_utf8(&buf) {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => store.handle_line(line.trim_end_matches(['\r', '\n'])),
                    Err(_) => encode_status(StatusReply::error("request is not valid UTF-8")),
                }
            };

            reply.push('\n');
            write.write_all(reply.as_bytes()).await?;
        }
    }

    /// Skip the rest of an oversized line in bounded reads.
    async fn discard_line<R>(reader: &mut R) -> Result<(), RelayError>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(());
            }
            if let Some(pos) = chunk.iter().position(|b| *b == b'\n') {
                reader.consume(pos + 1);
                return Ok(());
            }
            let len = chunk.len();
            reader.consume(len);
        }
    }
}

fn encode_status(reply: StatusReply) -> String {
    serde_json::to_string(&reply)
        .unwrap_or_else(|e| format!(r#"{{"status":"error","message":"encode failed: {e}"}}"#))
}
