use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker answered with a non-success status.
    #[error("broker API error: HTTP {status} (code {code:?}): {message}")]
    Api {
        status: StatusCode,
        code: Option<u64>,
        message: String,
    },
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to decode broker response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Error body returned by the broker, e.g.
/// `{"code": 40410000, "message": "position does not exist"}`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<u64>,
    message: Option<String>,
}

impl BrokerError {
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => BrokerError::Api {
                status,
                code: parsed.code,
                message: parsed.message.unwrap_or_else(|| body.to_string()),
            },
            Err(_) => BrokerError::Api {
                status,
                code: None,
                message: body.trim().to_string(),
            },
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BrokerError::Api { status, .. } => Some(*status),
            BrokerError::Http(e) => e.status(),
            BrokerError::Decode(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}
