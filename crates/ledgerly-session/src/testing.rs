//! Scripted transport for exercising the session without a server

use async_trait::async_trait;
use ledgerly_api::{ApiError, ApiRequest, ApiResponse, StatusCode, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum MockReply {
    Ok(Value),
    Status(StatusCode, Value),
    Network,
}

#[derive(Default)]
struct MockState {
    scripted: HashMap<String, VecDeque<MockReply>>,
    defaults: HashMap<String, MockReply>,
    requests: Vec<ApiRequest>,
}

/// Replies are queued per path and consumed in order; once a path's
/// queue is empty its default reply (if any) is used. Paths with neither
/// fail with a network error.
///
/// Each `send` yields to the runtime once, so concurrent requests
/// interleave the way they would against a real server.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, reply: MockReply) {
        self.state
            .lock()
            .scripted
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn ok(&self, path: &str, body: Value) {
        self.push(path, MockReply::Ok(body));
    }

    pub fn fail(&self, path: &str, status: StatusCode, body: Value) {
        self.push(path, MockReply::Status(status, body));
    }

    pub fn set_default(&self, path: &str, reply: MockReply) {
        self.state.lock().defaults.insert(path.to_string(), reply);
    }

    /// Every request seen so far, in arrival order
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().requests.clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    fn next_reply(&self, path: &str) -> Option<MockReply> {
        let mut state = self.state.lock();
        if let Some(reply) = state.scripted.get_mut(path).and_then(VecDeque::pop_front) {
            return Some(reply);
        }
        state.defaults.get(path).cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> ledgerly_api::Result<ApiResponse> {
        self.state.lock().requests.push(request.clone());

        tokio::task::yield_now().await;

        match self.next_reply(&request.path) {
            Some(MockReply::Ok(body)) => Ok(ApiResponse::ok(body)),
            Some(MockReply::Status(status, body)) => Err(ApiError::from_status(status, body)),
            Some(MockReply::Network) => Err(ApiError::Network("connection reset".to_string())),
            None => Err(ApiError::Network(format!(
                "no scripted reply for {}",
                request.path
            ))),
        }
    }
}
