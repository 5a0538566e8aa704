use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A request line sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RelayRequest {
    /// Fetch every stored order
    Read,
    /// Store or replace one order, keyed by its `id`
    Write { data: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Reply to a write, or to any request the relay could not serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusReply {
    pub fn ok() -> Self {
        Self {
            status: ReplyStatus::Ok,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            message: Some(message.into()),
        }
    }
}

/// Reply to a read: the latest version of every order seen so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelaySnapshot {
    /// Unix seconds of the last write (or of server start)
    pub last_updated: f64,
    pub orders: BTreeMap<String, Value>,
}

impl RelaySnapshot {
    pub fn order(&self, order_id: &str) -> Option<&Value> {
        self.orders.get(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let read: RelayRequest = serde_json::from_str(r#"{"action": "read"}"#).unwrap();
        assert_eq!(read, RelayRequest::Read);

        let write = RelayRequest::Write {
            data: json!({"id": "abc", "status": "filled"}),
        };
        let encoded = serde_json::to_value(&write).unwrap();
        assert_eq!(encoded, json!({"action": "write", "data": {"id": "abc", "status": "filled"}}));
    }

    #[test]
    fn test_status_reply_wire_format() {
        assert_eq!(serde_json::to_string(&StatusReply::ok()).unwrap(), r#"{"status":"ok"}"#);
        let err: StatusReply =
            serde_json::from_str(r#"{"status": "error", "message": "boom"}"#).unwrap();
        assert_eq!(err, StatusReply::error("boom"));
    }
}
