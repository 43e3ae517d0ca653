//! Ledgerly API
//!
//! Contract with the remote accounting API: wire types for the auth
//! endpoints, a transport-neutral request/response model, and the
//! reqwest-backed transport.

mod error;
mod request;
mod transport;
mod types;

pub use error::ApiError;
pub use request::{ApiRequest, ApiResponse, RequestBody};
pub use transport::{HttpTransport, Transport};
pub use types::{Company, LoginResponse, RefreshRequest, RefreshResponse, RegisterRequest, User};

pub use reqwest::{Method, StatusCode};

pub type Result<T> = std::result::Result<T, ApiError>;

/// Auth endpoint paths, relative to the configured base URL
pub mod endpoints {
    pub const LOGIN: &str = "/auth/login";
    pub const REGISTER: &str = "/auth/register";
    pub const REFRESH: &str = "/auth/refresh";
    pub const ME: &str = "/auth/me";
    pub const LOGOUT: &str = "/auth/logout";
}
