//! Authenticated request pipeline
//!
//! Every call made on behalf of the UI goes through [`AuthPipeline::send`]:
//!
//! 1. the stored access token, if any, is attached as a bearer credential;
//! 2. a 401 on a request that has not been replayed yet triggers one
//!    token refresh followed by one replay with the new token;
//! 3. if no refresh token is stored or the refresh fails, credentials are
//!    wiped, the session drops to `Anonymous` and
//!    [`SessionEvent::Invalidated`] is broadcast. The caller gets the
//!    original 401.

use ledgerly_api::{
    endpoints, ApiError, ApiRequest, ApiResponse, RefreshRequest, RefreshResponse, Transport,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::events::SessionEvent;
use crate::state::Session;
use crate::vault::CredentialVault;

/// How concurrent 401s coordinate their refresh calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// One refresh at a time; requests that waited reuse the token the
    /// previous refresh stored
    #[default]
    SingleFlight,
    /// Every 401 issues its own refresh call
    PerRequest,
}

enum RefreshOutcome {
    Refreshed(String),
    /// Refresh impossible or rejected; this caller must tear the session down
    Failed,
    /// Another request already tore the session down while this one waited
    AlreadyInvalidated,
}

#[derive(Clone)]
pub struct AuthPipeline {
    transport: Arc<dyn Transport>,
    vault: CredentialVault,
    session: Arc<RwLock<Session>>,
    events: broadcast::Sender<SessionEvent>,
    mode: RefreshMode,
    refresh_lock: Arc<Mutex<()>>,
}

impl AuthPipeline {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        vault: CredentialVault,
        session: Arc<RwLock<Session>>,
        events: broadcast::Sender<SessionEvent>,
        mode: RefreshMode,
    ) -> Self {
        Self {
            transport,
            vault,
            session,
            events,
            mode,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Send through both interceptors, recovering from one expired token
    pub async fn send(&self, mut request: ApiRequest) -> ledgerly_api::Result<ApiResponse> {
        self.attach_token(&mut request);

        match self.transport.send(&request).await {
            Err(err) if err.is_unauthorized() && !request.retried => {
                self.recover(request, err).await
            }
            other => other,
        }
    }

    /// Send with the bearer attached but without 401 recovery
    pub(crate) async fn send_once(
        &self,
        mut request: ApiRequest,
    ) -> ledgerly_api::Result<ApiResponse> {
        self.attach_token(&mut request);
        self.transport.send(&request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ledgerly_api::Result<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ledgerly_api::Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = ApiRequest::post(path).with_json(body)?;
        self.send(request).await?.json()
    }

    fn attach_token(&self, request: &mut ApiRequest) {
        match self.vault.access_token() {
            Ok(Some(token)) => request.set_bearer(&token),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(request_id = %request.id, error = %e, "Could not read access token");
            }
        }
    }

    async fn recover(
        &self,
        mut request: ApiRequest,
        original: ApiError,
    ) -> ledgerly_api::Result<ApiResponse> {
        request.retried = true;
        let rejected_token = request.bearer_token().map(str::to_owned);

        tracing::debug!(
            request_id = %request.id,
            path = %request.path,
            "Access token rejected, attempting refresh"
        );

        let outcome = match self.mode {
            RefreshMode::SingleFlight => self.refresh_single_flight(rejected_token.as_deref()).await,
            RefreshMode::PerRequest => self.refresh().await,
        };

        match outcome {
            RefreshOutcome::Refreshed(access_token) => {
                request.set_bearer(&access_token);
                tracing::debug!(request_id = %request.id, path = %request.path, "Replaying request");
                self.transport.send(&request).await
            }
            RefreshOutcome::Failed => {
                self.invalidate();
                Err(original)
            }
            RefreshOutcome::AlreadyInvalidated => Err(original),
        }
    }

    async fn refresh_single_flight(&self, rejected_token: Option<&str>) -> RefreshOutcome {
        let _guard = self.refresh_lock.lock().await;

        // Whoever held the lock before us may have already settled things
        match self.vault.access_token() {
            Ok(Some(current)) if rejected_token.is_some_and(|t| t != current) => {
                tracing::debug!("Reusing access token refreshed by a concurrent request");
                return RefreshOutcome::Refreshed(current);
            }
            Ok(None) if rejected_token.is_some() => return RefreshOutcome::AlreadyInvalidated,
            _ => {}
        }

        self.refresh().await
    }

    async fn refresh(&self) -> RefreshOutcome {
        let refresh_token = match self.vault.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::info!("No refresh token stored");
                return RefreshOutcome::Failed;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not read refresh token");
                return RefreshOutcome::Failed;
            }
        };

        let request = match ApiRequest::post(endpoints::REFRESH).with_json(&RefreshRequest {
            refresh_token: &refresh_token,
        }) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Could not build refresh request");
                return RefreshOutcome::Failed;
            }
        };

        // Bearer attached, no recovery: a 401 here ends the session
        let refreshed = match self.send_once(request).await {
            Ok(response) => response.json::<RefreshResponse>(),
            Err(e) => Err(e),
        };

        match refreshed {
            Ok(tokens) => {
                if let Err(e) = self
                    .vault
                    .store_refreshed(&tokens.access_token, tokens.refresh_token.as_deref())
                {
                    tracing::warn!(error = %e, "Could not persist refreshed access token");
                }
                tracing::info!("Access token refreshed");
                RefreshOutcome::Refreshed(tokens.access_token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed");
                RefreshOutcome::Failed
            }
        }
    }

    fn invalidate(&self) {
        if let Err(e) = self.vault.clear() {
            tracing::error!(error = %e, "Failed to clear stored credentials");
        }

        if let Err(e) = self.session.write().clear() {
            tracing::error!(error = %e, "Failed to reset session state");
        }

        tracing::warn!("Session invalidated, login required");
        let _ = self.events.send(SessionEvent::Invalidated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::state::AuthState;
    use crate::testing::{MockReply, MockTransport};
    use ledgerly_api::{StatusCode, User};
    use ledgerly_storage::MemoryStore;
    use serde_json::json;

    struct Fixture {
        pipeline: AuthPipeline,
        transport: MockTransport,
        store: MemoryStore,
        session: Arc<RwLock<Session>>,
        events: broadcast::Receiver<SessionEvent>,
    }

    fn fixture(mode: RefreshMode) -> Fixture {
        let transport = MockTransport::new();
        let store = MemoryStore::new();
        let vault = CredentialVault::new(Arc::new(store.clone()));
        let mut initial = Session::initial();
        initial.sign_in(User::new(1, "a@b.c", "A")).unwrap();
        let session = Arc::new(RwLock::new(initial));
        let tx = events::channel();
        let events = tx.subscribe();
        let pipeline = AuthPipeline::new(
            Arc::new(transport.clone()),
            vault,
            Arc::clone(&session),
            tx,
            mode,
        );
        Fixture {
            pipeline,
            transport,
            store,
            session,
            events,
        }
    }

    fn seed(store: &MemoryStore, access: &str, refresh: Option<&str>) {
        use ledgerly_storage::KeyValueStore;
        store.set("access_token", access).unwrap();
        if let Some(refresh) = refresh {
            store.set("refresh_token", refresh).unwrap();
        }
        store
            .set("user", r#"{"id":1,"email":"a@b.c","full_name":"A"}"#)
            .unwrap();
    }

    fn invalidations(rx: &mut broadcast::Receiver<SessionEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if event == SessionEvent::Invalidated {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_attaches_stored_token() {
        let f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", Some("r1"));
        f.transport.ok("/accounts", json!([]));

        f.pipeline.send(ApiRequest::get("/accounts")).await.unwrap();

        let sent = f.transport.requests_to("/accounts");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bearer_token(), Some("a1"));
    }

    #[tokio::test]
    async fn test_no_token_sends_unmodified() {
        let f = fixture(RefreshMode::SingleFlight);
        f.transport.ok("/health", json!({"status": "ok"}));

        f.pipeline.send(ApiRequest::get("/health")).await.unwrap();
        assert_eq!(f.transport.requests_to("/health")[0].bearer_token(), None);
    }

    #[tokio::test]
    async fn test_post_json_sends_json_body_with_bearer() {
        #[derive(Serialize)]
        struct NewTransaction<'a> {
            description: &'a str,
            amount: f64,
        }

        let f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", Some("r1"));
        f.transport.ok("/transactions", json!({"id": 7, "description": "Aluguel"}));

        let created: serde_json::Value = f
            .pipeline
            .post_json(
                "/transactions",
                &NewTransaction {
                    description: "Aluguel",
                    amount: 1200.0,
                },
            )
            .await
            .unwrap();
        assert_eq!(created["id"], 7);

        let sent = f.transport.requests_to("/transactions");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, ledgerly_api::Method::POST);
        assert_eq!(sent[0].bearer_token(), Some("a1"));
        assert_eq!(
            sent[0].body,
            ledgerly_api::RequestBody::Json(json!({"description": "Aluguel", "amount": 1200.0}))
        );
    }

    #[tokio::test]
    async fn test_post_json_accepts_unsized_body() {
        let f = fixture(RefreshMode::SingleFlight);
        f.transport.ok("/tags", json!(["fixo", "mensal"]));

        let tags: Vec<String> = f
            .pipeline
            .post_json("/tags", &["fixo", "mensal"][..])
            .await
            .unwrap();

        assert_eq!(tags, vec!["fixo", "mensal"]);
        assert_eq!(
            f.transport.requests_to("/tags")[0].body,
            ledgerly_api::RequestBody::Json(json!(["fixo", "mensal"]))
        );
    }

    #[tokio::test]
    async fn test_single_401_refreshes_and_replays_once() {
        let mut f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", Some("r1"));
        f.transport.fail("/accounts", StatusCode::UNAUTHORIZED, json!({"detail": "expired"}));
        f.transport.ok("/accounts", json!([{"id": 1, "name": "Caixa"}]));
        f.transport.ok(endpoints::REFRESH, json!({"access_token": "a2"}));

        let response = f.pipeline.send(ApiRequest::get("/accounts")).await.unwrap();
        assert_eq!(response.body, json!([{"id": 1, "name": "Caixa"}]));

        let refreshes = f.transport.requests_to(endpoints::REFRESH);
        assert_eq!(refreshes.len(), 1);
        assert_eq!(
            refreshes[0].body,
            ledgerly_api::RequestBody::Json(json!({"refresh_token": "r1"}))
        );
        assert_eq!(refreshes[0].bearer_token(), Some("a1"));
        assert!(!refreshes[0].retried);

        let sent = f.transport.requests_to("/accounts");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].bearer_token(), Some("a2"));
        assert!(sent[1].retried);
        assert_eq!(sent[0].id, sent[1].id);

        use ledgerly_storage::KeyValueStore;
        assert_eq!(f.store.get("access_token").unwrap().as_deref(), Some("a2"));
        assert_eq!(invalidations(&mut f.events), 0);
    }

    #[tokio::test]
    async fn test_second_401_after_replay_is_propagated() {
        let mut f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", Some("r1"));
        f.transport.fail("/accounts", StatusCode::UNAUTHORIZED, json!({}));
        f.transport.fail("/accounts", StatusCode::UNAUTHORIZED, json!({"detail": "still no"}));
        f.transport.ok(endpoints::REFRESH, json!({"access_token": "a2"}));

        let err = f.pipeline.send(ApiRequest::get("/accounts")).await.unwrap_err();
        assert_eq!(err.detail(), Some("still no"));
        assert_eq!(f.transport.requests_to(endpoints::REFRESH).len(), 1);
        assert_eq!(f.transport.requests_to("/accounts").len(), 2);
        assert_eq!(invalidations(&mut f.events), 0);
    }

    #[tokio::test]
    async fn test_already_retried_request_is_not_recovered() {
        let f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", Some("r1"));
        f.transport.fail("/accounts", StatusCode::UNAUTHORIZED, json!({}));

        let mut request = ApiRequest::get("/accounts");
        request.retried = true;
        let err = f.pipeline.send(request).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert!(f.transport.requests_to(endpoints::REFRESH).is_empty());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_invalidates() {
        let mut f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", None);
        f.transport.fail("/accounts", StatusCode::UNAUTHORIZED, json!({"detail": "expired"}));

        let err = f.pipeline.send(ApiRequest::get("/accounts")).await.unwrap_err();

        assert_eq!(err.detail(), Some("expired"));
        assert!(f.transport.requests_to(endpoints::REFRESH).is_empty());
        assert!(f.store.is_empty());
        assert_eq!(f.session.read().state, AuthState::Anonymous);
        assert_eq!(f.session.read().user, None);
        assert_eq!(invalidations(&mut f.events), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_invalidates() {
        let mut f = fixture(RefreshMode::PerRequest);
        seed(&f.store, "a1", Some("r1"));
        f.transport.fail("/accounts", StatusCode::UNAUTHORIZED, json!({"detail": "expired"}));
        f.transport.fail(
            endpoints::REFRESH,
            StatusCode::UNAUTHORIZED,
            json!({"detail": "Could not validate credentials"}),
        );

        let err = f.pipeline.send(ApiRequest::get("/accounts")).await.unwrap_err();

        assert_eq!(err.detail(), Some("expired"));
        assert_eq!(f.transport.requests_to(endpoints::REFRESH).len(), 1);
        assert_eq!(f.transport.requests_to("/accounts").len(), 1);
        assert!(f.store.is_empty());
        assert_eq!(f.session.read().state, AuthState::Anonymous);
        assert_eq!(invalidations(&mut f.events), 1);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let mut f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", Some("r1"));
        f.transport.fail(
            "/accounts",
            StatusCode::FORBIDDEN,
            json!({"detail": "Not enough permissions"}),
        );

        let err = f.pipeline.send(ApiRequest::get("/accounts")).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert!(f.transport.requests_to(endpoints::REFRESH).is_empty());
        assert_eq!(f.store.len(), 3);
        assert_eq!(invalidations(&mut f.events), 0);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", Some("r1"));
        f.transport.fail("/accounts", StatusCode::UNAUTHORIZED, json!({}));
        f.transport.ok("/accounts", json!([]));
        f.transport.ok(
            endpoints::REFRESH,
            json!({"access_token": "a2", "refresh_token": "r2", "token_type": "bearer"}),
        );

        f.pipeline.send(ApiRequest::get("/accounts")).await.unwrap();

        use ledgerly_storage::KeyValueStore;
        assert_eq!(f.store.get("refresh_token").unwrap().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_single_flight_shares_one_refresh() {
        let f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", Some("r1"));
        for _ in 0..3 {
            f.transport.fail("/accounts", StatusCode::UNAUTHORIZED, json!({}));
        }
        f.transport.set_default("/accounts", MockReply::Ok(json!([])));
        f.transport.ok(endpoints::REFRESH, json!({"access_token": "a2"}));
        f.transport.ok(endpoints::REFRESH, json!({"access_token": "a3"}));
        f.transport.ok(endpoints::REFRESH, json!({"access_token": "a4"}));

        let results = futures_util::future::join_all(
            (0..3).map(|_| f.pipeline.send(ApiRequest::get("/accounts"))),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(f.transport.requests_to(endpoints::REFRESH).len(), 1);
        let replays: Vec<_> = f
            .transport
            .requests_to("/accounts")
            .into_iter()
            .filter(|r| r.retried)
            .collect();
        assert_eq!(replays.len(), 3);
        assert!(replays.iter().all(|r| r.bearer_token() == Some("a2")));
    }

    #[tokio::test]
    async fn test_per_request_refreshes_each_time() {
        let f = fixture(RefreshMode::PerRequest);
        seed(&f.store, "a1", Some("r1"));
        for _ in 0..3 {
            f.transport.fail("/accounts", StatusCode::UNAUTHORIZED, json!({}));
        }
        f.transport.set_default("/accounts", MockReply::Ok(json!([])));
        f.transport
            .set_default(endpoints::REFRESH, MockReply::Ok(json!({"access_token": "a2"})));

        let results = futures_util::future::join_all(
            (0..3).map(|_| f.pipeline.send(ApiRequest::get("/accounts"))),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(f.transport.requests_to(endpoints::REFRESH).len(), 3);
    }

    #[tokio::test]
    async fn test_single_flight_invalidates_once() {
        let mut f = fixture(RefreshMode::SingleFlight);
        seed(&f.store, "a1", Some("r1"));
        f.transport.set_default(
            "/accounts",
            MockReply::Status(StatusCode::UNAUTHORIZED, json!({})),
        );
        f.transport.set_default(
            endpoints::REFRESH,
            MockReply::Status(StatusCode::UNAUTHORIZED, json!({})),
        );

        let results = futures_util::future::join_all(
            (0..3).map(|_| f.pipeline.send(ApiRequest::get("/accounts"))),
        )
        .await;

        assert!(results.iter().all(|r| r
            .as_ref()
            .is_err_and(|e| e.is_unauthorized())));
        assert_eq!(f.transport.requests_to(endpoints::REFRESH).len(), 1);
        assert!(f.store.is_empty());
        assert_eq!(invalidations(&mut f.events), 1);
    }
}
