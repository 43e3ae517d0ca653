//! Scoped access to the session
//!
//! UI code reaches the [`SessionManager`] through [`use_session`], which
//! only works inside a [`SessionProvider::scope`]. Tasks spawned from
//! inside a scope do not inherit it; wrap them in their own scope.

use std::future::Future;

use crate::error::SessionError;
use crate::manager::SessionManager;
use crate::Result;

tokio::task_local! {
    static CURRENT_SESSION: SessionManager;
}

pub struct SessionProvider;

impl SessionProvider {
    /// Run `f` with `manager` available to [`use_session`]
    pub async fn scope<F: Future>(manager: SessionManager, f: F) -> F::Output {
        CURRENT_SESSION.scope(manager, f).await
    }
}

/// The session of the enclosing provider scope.
///
/// Outside a scope this is an error, never a default session.
pub fn use_session() -> Result<SessionManager> {
    CURRENT_SESSION
        .try_with(SessionManager::clone)
        .map_err(|_| SessionError::NoProvider)
}
