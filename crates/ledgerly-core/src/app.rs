//! Application shell
//!
//! Owns the session for one application load and turns session events
//! into navigation. Nothing below this layer navigates.

use ledgerly_api::{HttpTransport, Transport};
use ledgerly_session::{Session, SessionEvent, SessionManager, SessionProvider};
use ledgerly_storage::{Database, KeyValueStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Session restoration still running
    Loading,
    /// Login entry point
    Login,
    /// Signed-in landing page
    Dashboard,
}

impl Route {
    fn after(event: &SessionEvent) -> Route {
        match event {
            SessionEvent::Authenticated { .. } => Route::Dashboard,
            SessionEvent::LoggedOut | SessionEvent::Invalidated => Route::Login,
        }
    }
}

pub struct App {
    config: Config,
    session: SessionManager,
    route: Arc<watch::Sender<Route>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    /// Open the session database and connect to the configured API
    pub fn new(config: Config) -> Result<Self> {
        let db = Database::open(&config.database_path)?;
        let transport = HttpTransport::with_timeout(&config.api_url, config.request_timeout)?;

        tracing::info!(api_url = %config.api_url, refresh_mode = ?config.refresh_mode, "Configured client");

        Ok(Self::with_parts(config, Arc::new(db), Arc::new(transport)))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let session = SessionManager::new(store, transport, config.refresh_mode);
        let (route, _) = watch::channel(Route::Loading);

        Self {
            config,
            session,
            route: Arc::new(route),
            watcher: Mutex::new(None),
        }
    }

    /// Start following session events, then restore the stored session
    pub async fn initialize(&self) -> Session {
        self.spawn_watcher();

        let session = self.session.initialize().await;
        let route = if session.is_authenticated() {
            Route::Dashboard
        } else {
            Route::Login
        };
        self.route.send_replace(route);

        tracing::info!(state = %session.state, ?route, "Application initialized");
        session
    }

    fn spawn_watcher(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return;
        }

        let mut events = self.session.subscribe();
        let route = Arc::clone(&self.route);
        *watcher = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let next = Route::after(&event);
                        if *route.borrow() != next {
                            tracing::info!(?event, ?next, "Navigating");
                        }
                        route.send_replace(next);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn route(&self) -> Route {
        *self.route.borrow()
    }

    pub fn watch_route(&self) -> watch::Receiver<Route> {
        self.route.subscribe()
    }

    /// Run UI work with the session reachable through `use_session`
    pub async fn run<F: Future>(&self, f: F) -> F::Output {
        SessionProvider::scope(self.session.clone(), f).await
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerly_api::{endpoints, StatusCode};
    use ledgerly_session::testing::MockTransport;
    use ledgerly_session::{use_session, AuthState};
    use ledgerly_storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn app() -> (App, MockTransport) {
        let transport = MockTransport::new();
        let config = Config::new(std::env::temp_dir().join("ledgerly-test"));
        let app = App::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(transport.clone()),
        );
        (app, transport)
    }

    async fn wait_for(app: &App, expected: Route) {
        let mut rx = app.watch_route();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|r| *r == expected))
            .await
            .expect("route change timed out")
            .unwrap();
    }

    fn login_body() -> serde_json::Value {
        json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "user": {"id": 1, "email": "a@b.c", "full_name": "A"}
        })
    }

    #[tokio::test]
    async fn test_anonymous_start_routes_to_login() {
        let (app, _transport) = app();
        assert_eq!(app.route(), Route::Loading);

        let session = app.initialize().await;
        assert_eq!(session.state, AuthState::Anonymous);
        assert_eq!(app.route(), Route::Login);
    }

    #[tokio::test]
    async fn test_invalidation_navigates_to_login() {
        let (app, transport) = app();
        app.initialize().await;

        transport.ok(endpoints::LOGIN, login_body());
        assert!(app.session().login("a@b.c", "pw").await.success);
        wait_for(&app, Route::Dashboard).await;

        transport.fail("/reports", StatusCode::UNAUTHORIZED, json!({}));
        transport.fail(endpoints::REFRESH, StatusCode::UNAUTHORIZED, json!({}));
        let err = app
            .session()
            .client()
            .get_json::<serde_json::Value>("/reports")
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        wait_for(&app, Route::Login).await;
    }

    #[tokio::test]
    async fn test_run_provides_session() {
        let (app, transport) = app();
        app.initialize().await;
        transport.ok(endpoints::LOGIN, login_body());

        let outcome = app
            .run(async {
                let session = use_session().unwrap();
                session.login("a@b.c", "pw").await
            })
            .await;

        assert!(outcome.success);
        assert_eq!(app.session().state(), AuthState::Authenticated);
    }
}
