//! Transport seam between the session pipeline and the network

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::ApiError;
use crate::request::{ApiRequest, ApiResponse, RequestBody};
use crate::Result;

/// Sends one request and returns its response.
///
/// Non-2xx responses come back as [`ApiError::Status`] so callers can
/// branch on the status without inspecting successful bodies.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// reqwest-backed transport rooted at the API base URL
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, None)
    }

    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let base_url = normalize_base(base_url)?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))
    }
}

/// `Url::join` replaces the last path segment unless the base ends in `/`
fn normalize_base(base_url: &str) -> Result<Url> {
    let mut url =
        Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.resolve(&request.path)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(request_id = %request.id, path = %request.path, error = %e, "Request failed");
            ApiError::Network(e.to_string())
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        tracing::debug!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            "Response received"
        );

        if status.is_success() {
            Ok(ApiResponse::new(status, body))
        } else {
            Err(ApiError::from_status(status, body))
        }
    }
}
