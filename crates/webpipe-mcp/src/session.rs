//! Session lifecycle for the MCP SSE transport: at most one active session
//! at a time; opening a new one replaces the old.

use axum::response::sse::Event;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

struct Session {
    id: String,
    tx: mpsc::UnboundedSender<Event>,
}

pub struct SessionManager {
    active: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self { active: Mutex::new(None) }
    }

    /// Replaces any existing session (dropping its sender ends its SSE
    /// stream) and returns the fresh session id plus its event receiver.
    pub async fn open(&self) -> (String, mpsc::UnboundedReceiver<Event>) {
        let mut guard = self.active.lock().await;
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        *guard = Some(Session { id: id.clone(), tx });
        (id, rx)
    }

    /// Tears down the active session, if any. Returns `true` if one existed.
    pub async fn close(&self) -> bool {
        self.active.lock().await.take().is_some()
    }

    pub async fn active_id(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|s| s.id.clone())
    }

    pub async fn has_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn sse_alive(&self) -> bool {
        match self.active.lock().await.as_ref() {
            Some(s) => !s.tx.is_closed(),
            None => false,
        }
    }

    /// Sends an event to the active session, if any. Returns `false` if
    /// there is none or the stream has gone away.
    pub async fn send(&self, event: Event) -> bool {
        match self.active.lock().await.as_ref() {
            Some(s) => s.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Polls every 500ms for up to 5s for a session to (re)appear.
    pub async fn wait_for_session(&self) -> bool {
        if self.has_active().await {
            return true;
        }
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if self.has_active().await {
                return true;
            }
        }
        false
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opening_a_session_replaces_the_old_one() {
        let mgr = SessionManager::new();
        let (first_id, mut first_rx) = mgr.open().await;
        let (second_id, _second_rx) = mgr.open().await;
        assert_ne!(first_id, second_id);
        // The old sender was dropped when replaced, so its receiver drains to None.
        assert!(first_rx.recv().await.is_none());
        assert_eq!(mgr.active_id().await, Some(second_id));
    }

    #[tokio::test]
    async fn close_without_session_reports_false() {
        let mgr = SessionManager::new();
        assert!(!mgr.close().await);
        let (_id, _rx) = mgr.open().await;
        assert!(mgr.close().await);
        assert!(mgr.active_id().await.is_none());
    }

    #[tokio::test]
    async fn wait_for_session_returns_immediately_when_active() {
        let mgr = SessionManager::new();
        let (_id, _rx) = mgr.open().await;
        let start = tokio::time::Instant::now();
        assert!(mgr.wait_for_session().await);
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
