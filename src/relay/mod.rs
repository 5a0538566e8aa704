//! Order relay.
//!
//! The streamer writes every order update here; the trader (or any operator
//! tool) reads the latest state of all orders back. The wire format is one
//! JSON object per line over TCP, strictly request then reply:
//!
//! ```text
//! -> {"action":"write","data":{"id":"...", ...}}
//! <- {"status":"ok"}
//! -> {"action":"read"}
//! <- {"last_updated":1595600000.12,"orders":{"<id>":{...}}}
//! ```

pub mod client;
pub mod forward;
pub mod protocol;
pub mod server;

use std::time::Duration;
use thiserror::Error;

pub use client::RelayClient;
pub use forward::{forward_updates, ForwardStats};
pub use protocol::{RelayRequest, RelaySnapshot, StatusReply};
pub use server::{OrderStore, RelayServer};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid relay message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("relay rejected request: {0}")]
    Rejected(String),
    #[error("relay connection closed")]
    Closed,
    #[error("relay did not reply within {0:?}")]
    Timeout(Duration),
    #[error("order has no string `id` field")]
    MissingOrderId,
}
