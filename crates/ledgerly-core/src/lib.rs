//! Ledgerly Core
//!
//! Application shell for the Ledgerly client: configuration, logging and
//! the `App` that owns the session for one application load.

mod app;
mod config;
mod error;

pub use app::{App, Route};
pub use config::Config;
pub use error::CoreError;

// Re-export core components
pub use ledgerly_api::{ApiError, ApiRequest, ApiResponse, HttpTransport, RegisterRequest, User};
pub use ledgerly_session::{
    use_session, AuthOutcome, AuthState, RefreshMode, Session, SessionError, SessionEvent,
    SessionManager, SessionProvider,
};
pub use ledgerly_storage::{Database, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
