//! Session Manager
//!
//! Owns who is signed in. Rehydrates from durable storage at startup,
//! performs login/register/logout, and hands out the authenticated
//! request pipeline every other API call goes through.

use ledgerly_api::{endpoints, ApiRequest, LoginResponse, RegisterRequest, Transport, User};
use ledgerly_storage::KeyValueStore;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::events::{self, SessionEvent};
use crate::outcome::{AuthOutcome, LOGIN_FAILED_MESSAGE, REGISTER_FAILED_MESSAGE};
use crate::pipeline::{AuthPipeline, RefreshMode};
use crate::state::{AuthState, Session};
use crate::vault::CredentialVault;

pub struct SessionManager {
    /// Current user, loading flag and state, shared with the pipeline
    session: Arc<RwLock<Session>>,
    /// Durable credential set
    vault: CredentialVault,
    /// Request pipeline with token attachment and refresh-on-401
    pipeline: AuthPipeline,
    /// Lifecycle notifications for the application shell
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        refresh_mode: RefreshMode,
    ) -> Self {
        let session = Arc::new(RwLock::new(Session::initial()));
        let vault = CredentialVault::new(store);
        let events = events::channel();
        let pipeline = AuthPipeline::new(
            transport,
            vault.clone(),
            Arc::clone(&session),
            events.clone(),
            refresh_mode,
        );

        Self {
            session,
            vault,
            pipeline,
            events,
        }
    }

    /// Restore the session from durable storage and verify the stored
    /// access token against `/auth/me`.
    ///
    /// Runs once; later calls return the current snapshot. Any failure
    /// wipes storage and leaves the session `Anonymous`.
    pub async fn initialize(&self) -> Session {
        if self.session.read().state != AuthState::Init {
            return self.snapshot();
        }

        match self.stored_login() {
            Some(user) => {
                // Optimistic: the UI can render the user while we verify
                self.session.write().user = Some(user.clone());

                match self.pipeline.send(ApiRequest::get(endpoints::ME)).await {
                    Ok(_) => {
                        self.enter_authenticated(user.clone());
                        tracing::info!(user_id = user.id, "Restored session");
                        let _ = self
                            .events
                            .send(SessionEvent::Authenticated { user_id: user.id });
                    }
                    Err(e) => {
                        tracing::info!(error = %e, "Stored session rejected, clearing");
                        self.teardown();
                    }
                }
            }
            None => {
                self.enter_anonymous();
            }
        }

        self.session.write().loading = false;
        self.snapshot()
    }

    /// Stored user if the access token and user entries are both present;
    /// incomplete or unreadable leftovers are wiped
    fn stored_login(&self) -> Option<User> {
        let stored = self
            .vault
            .access_token()
            .and_then(|token| Ok((token, self.vault.user()?)));

        match stored {
            Ok((Some(_), Some(user))) => Some(user),
            Ok(_) => {
                if self.vault.has_any().unwrap_or(true) {
                    tracing::debug!("Discarding incomplete stored credentials");
                    self.clear_storage();
                }
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stored credentials unreadable, clearing");
                self.clear_storage();
                None
            }
        }
    }

    pub fn user(&self) -> Option<User> {
        self.session.read().user.clone()
    }

    pub fn loading(&self) -> bool {
        self.session.read().loading
    }

    pub fn state(&self) -> AuthState {
        self.session.read().state
    }

    pub fn snapshot(&self) -> Session {
        self.session.read().clone()
    }

    /// The pipeline every authenticated API call should use
    pub fn client(&self) -> &AuthPipeline {
        &self.pipeline
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Log in with email and password.
    ///
    /// The login endpoint takes a form-encoded body, unlike every other
    /// endpoint. Never fails; rejections come back as an [`AuthOutcome`].
    pub async fn login(&self, email: &str, password: &str) -> AuthOutcome {
        let request = ApiRequest::post(endpoints::LOGIN)
            .with_form([("username", email), ("password", password)]);

        match self.pipeline.send_once(request).await {
            Ok(response) => self.complete_login(response.json(), LOGIN_FAILED_MESSAGE),
            Err(e) => {
                tracing::info!(error = %e, "Login rejected");
                AuthOutcome::from_api_error(&e, LOGIN_FAILED_MESSAGE)
            }
        }
    }

    /// Create a user and company, signing the new user in
    pub async fn register(&self, data: &RegisterRequest) -> AuthOutcome {
        let request = match ApiRequest::post(endpoints::REGISTER).with_json(data) {
            Ok(request) => request,
            Err(e) => return AuthOutcome::from_api_error(&e, REGISTER_FAILED_MESSAGE),
        };

        match self.pipeline.send_once(request).await {
            Ok(response) => self.complete_login(response.json(), REGISTER_FAILED_MESSAGE),
            Err(e) => {
                tracing::info!(error = %e, "Registration rejected");
                AuthOutcome::from_api_error(&e, REGISTER_FAILED_MESSAGE)
            }
        }
    }

    fn complete_login(
        &self,
        response: ledgerly_api::Result<LoginResponse>,
        fallback: &str,
    ) -> AuthOutcome {
        let login = match response {
            Ok(login) => login,
            Err(e) => {
                tracing::warn!(error = %e, "Unexpected login response");
                return AuthOutcome::from_api_error(&e, fallback);
            }
        };

        if let Err(e) =
            self.vault
                .store_login(&login.access_token, &login.refresh_token, &login.user)
        {
            tracing::error!(error = %e, "Failed to persist credentials");
            self.clear_storage();
            return AuthOutcome::failure(fallback);
        }

        let user_id = login.user.id;
        self.enter_authenticated(login.user);
        tracing::info!(user_id, "Signed in");
        let _ = self.events.send(SessionEvent::Authenticated { user_id });

        AuthOutcome::ok()
    }

    /// Tell the server, then clear local state whatever it said
    pub async fn logout(&self) {
        if let Err(e) = self
            .pipeline
            .send_once(ApiRequest::post(endpoints::LOGOUT))
            .await
        {
            tracing::debug!(error = %e, "Ignoring logout failure");
        }

        self.teardown();
        tracing::info!("Logged out");
        let _ = self.events.send(SessionEvent::LoggedOut);
    }

    /// Replace the current user locally. The caller is responsible for
    /// having saved the change on the server.
    pub fn update_user(&self, user: User) {
        if let Err(e) = self.vault.store_user(&user) {
            tracing::error!(user_id = user.id, error = %e, "Failed to persist updated user");
        }
        self.session.write().user = Some(user);
    }

    fn enter_authenticated(&self, user: User) {
        if let Err(e) = self.session.write().sign_in(user) {
            tracing::error!(error = %e, "Rejected session transition");
        }
    }

    fn enter_anonymous(&self) {
        if let Err(e) = self.session.write().clear() {
            tracing::error!(error = %e, "Rejected session transition");
        }
    }

    fn clear_storage(&self) {
        if let Err(e) = self.vault.clear() {
            tracing::error!(error = %e, "Failed to clear stored credentials");
        }
    }

    fn teardown(&self) {
        self.clear_storage();
        self.enter_anonymous();
    }
}

impl Clone for SessionManager {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            vault: self.vault.clone(),
            pipeline: self.pipeline.clone(),
            events: self.events.clone(),
        }
    }
}
