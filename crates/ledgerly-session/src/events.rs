//! Session lifecycle notifications
//!
//! The application shell subscribes to these instead of the transport
//! layer driving navigation itself.

use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A user signed in, registered or was restored from storage
    Authenticated { user_id: i64 },
    /// The user logged out
    LoggedOut,
    /// Token refresh failed irrecoverably; storage has been wiped and the
    /// user must log in again
    Invalidated,
}

pub(crate) fn channel() -> broadcast::Sender<SessionEvent> {
    let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
    tx
}
