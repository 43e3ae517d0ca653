//! Wire types for the auth endpoints

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnpj: Option<String>,
    /// Contact and audit fields the client passes through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Authenticated user as returned by the API.
///
/// Only the identifying fields are typed; everything else (`role`,
/// `is_active`, `company_id`, timestamps, ...) lands in `extra` so a
/// stored record restores exactly as it was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<Company>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: i64, email: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            full_name: full_name.into(),
            company: None,
            extra: Map::new(),
        }
    }
}

/// Body of `/auth/login` and `/auth/register` responses
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present when the server rotates refresh tokens
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_cnpj: Option<String>,
}
