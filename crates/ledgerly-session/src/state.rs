//! Authentication State Machine
//!
//! ```text
//! Init ──restore ok──────────────▶ Authenticated
//!   │                                 │   ▲
//!   │ nothing stored /                │   │ login, register
//!   │ restore failed        logout /  │   │
//!   ▼                     invalidated ▼   │
//! Anonymous ◀─────────────────────────────┘
//! ```
//!
//! `Init` is entered exactly once, at construction.

use ledgerly_api::User;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    /// Restoring from durable storage
    Init,
    /// No user signed in
    Anonymous,
    /// A user is signed in and its tokens are stored
    Authenticated,
}

impl AuthState {
    pub fn can_transition_to(&self, target: AuthState) -> bool {
        !matches!(target, AuthState::Init)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Init => "init",
            AuthState::Anonymous => "anonymous",
            AuthState::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the UI reads: the current user and whether restoration is still running
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub user: Option<User>,
    pub loading: bool,
    pub state: AuthState,
}

impl Session {
    pub fn initial() -> Self {
        Self {
            user: None,
            loading: true,
            state: AuthState::Init,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    pub fn transition_to(&mut self, new_state: AuthState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(SessionError::InvalidTransition {
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }

        if self.state != new_state {
            tracing::debug!(from = %self.state, to = %new_state, "Session state transition");
        }

        self.state = new_state;
        Ok(())
    }

    /// Drop the user and fall back to `Anonymous`
    pub fn clear(&mut self) -> Result<()> {
        self.transition_to(AuthState::Anonymous)?;
        self.user = None;
        Ok(())
    }

    pub fn sign_in(&mut self, user: User) -> Result<()> {
        self.transition_to(AuthState::Authenticated)?;
        self.user = Some(user);
        Ok(())
    }
}
