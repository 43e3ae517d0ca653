//! Ledgerly Session Management
//!
//! - One `SessionManager` per application load, shared by cloning
//! - Credentials persist across restarts and are verified on startup
//! - Expired access tokens are refreshed once per request, transparently
//! - Irrecoverable auth failures wipe storage and emit `Invalidated`;
//!   navigation is the application shell's job

mod error;
mod events;
mod manager;
mod outcome;
mod pipeline;
mod provider;
mod state;
mod vault;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::SessionError;
pub use events::SessionEvent;
pub use manager::SessionManager;
pub use outcome::{AuthOutcome, LOGIN_FAILED_MESSAGE, REGISTER_FAILED_MESSAGE};
pub use pipeline::{AuthPipeline, RefreshMode};
pub use provider::{use_session, SessionProvider};
pub use state::{AuthState, Session};
pub use vault::{CredentialVault, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};

pub type Result<T> = std::result::Result<T, SessionError>;
