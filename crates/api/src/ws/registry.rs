use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use qpulse_core::types::{SessionId, Timestamp};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing frames to a viewer session.
pub type SessionSender = mpsc::UnboundedSender<Message>;

/// Receiver half, owned by whichever transport currently serves the session.
pub type SessionReceiver = mpsc::UnboundedReceiver<Message>;

/// How a viewer session is currently attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    WebSocket,
    Polling,
}

/// Registry entry for one connected viewer.
pub struct ViewerSession {
    pub transport: Transport,
    /// Channel sender for outbound frames to this session.
    pub sender: SessionSender,
    /// When this session was registered.
    pub connected_at: Timestamp,
}

/// Tracks the connect/disconnect lifecycle of viewer sessions.
///
/// Thread-safe via interior `RwLock`; wrapped in `Arc` and shared by the
/// transports, the broadcast hub and the heartbeat. Membership is only
/// changed through [`add`](Self::add) and [`remove`](Self::remove); readers
/// go through [`for_each`](Self::for_each), which works on a point-in-time
/// copy so concurrent add/remove never interferes with a fan-out.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, ViewerSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session.
    ///
    /// Returns the receiver half of the session's channel so the transport
    /// can forward frames to the client. Re-using an id replaces the old
    /// entry.
    pub async fn add(&self, id: SessionId, transport: Transport) -> SessionReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ViewerSession {
            transport,
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        self.sessions.write().await.insert(id, session);
        rx
    }

    /// Remove a session. Returns whether it was registered.
    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Record that a session moved to another transport (poll upgrade).
    pub async fn set_transport(&self, id: &str, transport: Transport) -> bool {
        match self.sessions.write().await.get_mut(id) {
            Some(session) => {
                session.transport = transport;
                true
            }
            None => false,
        }
    }

    /// Sender for a single session, if it is registered.
    pub async fn sender(&self, id: &str) -> Option<SessionSender> {
        self.sessions.read().await.get(id).map(|s| s.sender.clone())
    }

    /// Invoke `f` for every session registered at the time of the call.
    ///
    /// Senders are cloned under the read lock and the lock is released
    /// before `f` runs: sessions added meanwhile are not visited, sessions
    /// removed meanwhile are still visited and their sends simply fail.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &SessionSender),
    {
        let members: Vec<(SessionId, SessionSender)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.sender.clone()))
            .collect();

        for (id, sender) in &members {
            f(id, sender);
        }
    }

    /// Return the current number of registered sessions.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Return the number of sessions attached through `transport`.
    pub async fn count_by_transport(&self, transport: Transport) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.transport == transport)
            .count()
    }

    /// Send a Ping frame to every WebSocket session.
    pub async fn ping_all(&self) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            if session.transport == Transport::WebSocket {
                let _ = session.sender.send(Message::Ping(Bytes::new()));
            }
        }
    }

    /// Send a Close frame to every session, then clear the registry.
    ///
    /// Used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        for session in sessions.values() {
            let _ = session.sender.send(Message::Close(None));
        }
        sessions.clear();
        tracing::info!(count, "Closed all viewer sessions");
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
