use crate::relay::protocol::{RelayRequest, RelaySnapshot, ReplyStatus, StatusReply};
use crate::relay::RelayError;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, RelayError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        debug!("Connected to relay at {addr}");
        Ok(Self {
            lines: BufReader::new(read).lines(),
            write,
        })
    }

    async fn exchange(&mut self, line: &str) -> Result<String, RelayError> {
        self.write.write_all(line.as_bytes()).await?;
        self.write.write_all(b"\n").await?;
        match tokio::time::timeout(REPLY_TIMEOUT, self.lines.next_line()).await {
            Ok(Ok(Some(reply))) => Ok(reply),
            Ok(Ok(None)) => Err(RelayError::Closed),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(RelayError::Timeout(REPLY_TIMEOUT)),
        }
    }
}

/// Request/reply client for the relay.
///
/// Requests are serialized: a reply is always read before the next request is
/// sent. A failed exchange drops the connection and the next call reconnects.
pub struct RelayClient {
    addr: String,
    conn: Mutex<Option<Connection>>,
}

impl RelayClient {
    /// Create a client that connects on first use.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    /// Create a client and open the connection now.
    pub async fn connect(addr: impl Into<String>) -> Result<Self, RelayError> {
        let client = Self::new(addr);
        let conn = Connection::open(&client.addr).await?;
        *client.conn.lock().await = Some(conn);
        Ok(client)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn request(&self, request: &RelayRequest) -> Result<String, RelayError> {
        let line = serde_json::to_string(request)?;
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            *guard = Some(Connection::open(&self.addr).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(RelayError::Closed);
        };

        match conn.exchange(&line).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!("Relay exchange failed, dropping connection: {e}");
                *guard = None;
                Err(e)
            }
        }
    }

    /// Fetch every order the relay holds.
    pub async fn read(&self) -> Result<RelaySnapshot, RelayError> {
        let reply = self.request(&RelayRequest::Read).await?;
        let value: Value = serde_json::from_str(&reply)?;
        if value.get("status").is_some() {
            let status: StatusReply = serde_json::from_value(value)?;
            return Err(RelayError::Rejected(status.message.unwrap_or_default()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Store one order (must serialize to an object with a string `id`).
    pub async fn write<T: Serialize>(&self, order: &T) -> Result<(), RelayError> {
        let data = serde_json::to_value(order)?;
        let reply = self.request(&RelayRequest::Write { data }).await?;
        let status: StatusReply = serde_json::from_str(&reply)?;
        match status.status {
            ReplyStatus::Ok => Ok(()),
            ReplyStatus::Error => Err(RelayError::Rejected(status.message.unwrap_or_default())),
        }
    }
}
