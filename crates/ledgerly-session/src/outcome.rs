use ledgerly_api::ApiError;
use serde::Serialize;

pub const LOGIN_FAILED_MESSAGE: &str = "Erro ao fazer login";
pub const REGISTER_FAILED_MESSAGE: &str = "Erro ao criar conta";

/// Result of `login`/`register`, shaped for inline form errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }

    /// Prefer the server's `detail`, fall back to the operation's default
    pub fn from_api_error(err: &ApiError, fallback: &str) -> Self {
        Self::failure(err.detail().unwrap_or(fallback))
    }
}
