//! API error types

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("HTTP {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Status {
        status: StatusCode,
        detail: Option<String>,
        body: Value,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to encode request: {0}")]
    Encode(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Build a status error, pulling the server's `detail` out of the body
    pub fn from_status(status: StatusCode, body: Value) -> Self {
        let detail = extract_detail(&body);
        ApiError::Status {
            status,
            detail,
            body,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-supplied message, if the error came with one
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

/// FastAPI reports errors as `{"detail": "..."}` or, for validation
/// failures, `{"detail": [{"msg": "...", ...}, ...]}`.
fn extract_detail(body: &Value) -> Option<String> {
    match body.get("detail")? {
        Value::String(message) => Some(message.clone()),
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    }
}
