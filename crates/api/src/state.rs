use std::sync::Arc;

use qpulse_core::messages::ViewerMessage;
use qpulse_core::types::SessionId;
use tokio::sync::Notify;

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::ws::{BroadcastHub, PollSessions, SessionReceiver, SessionRegistry, Transport};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Connected viewer sessions.
    pub registry: Arc<SessionRegistry>,
    /// Fan-out over `registry`.
    pub hub: BroadcastHub,
    /// Receivers of sessions attached through the long-polling transport.
    pub polls: Arc<PollSessions>,
    /// Wakes the sampler early when a viewer connects.
    pub sampler_nudge: Arc<Notify>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let polls = Arc::new(PollSessions::new(
            config.transport.poll_wait,
            config.transport.poll_timeout,
        ));
        Self {
            config: Arc::new(config),
            hub: BroadcastHub::new(Arc::clone(&registry)),
            registry,
            polls,
            sampler_nudge: Arc::new(Notify::new()),
        }
    }

    /// Register a new viewer session and queue its `message-connect`
    /// acknowledgment.
    ///
    /// When this is the only viewer the sampler is nudged: it has been
    /// skipping ticks, so its last snapshot may be stale.
    pub async fn open_session(&self, transport: Transport) -> AppResult<(SessionId, SessionReceiver)> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let rx = self.registry.add(session_id.clone(), transport).await;

        if !self.hub.send_to(&session_id, &ViewerMessage::connected()).await {
            self.registry.remove(&session_id).await;
            return Err(AppError::InternalError(format!(
                "Failed to queue connect acknowledgment for {session_id}"
            )));
        }

        let viewers = self.registry.connection_count().await;
        if viewers == 1 {
            self.sampler_nudge.notify_one();
        }
        tracing::info!(session_id = %session_id, ?transport, viewers, "Viewer connected");
        Ok((session_id, rx))
    }

    /// Deregister a viewer session. Disconnects are the normal end of a
    /// session's life and are logged as such.
    pub async fn close_session(&self, session_id: &str, reason: &'static str) {
        if self.registry.remove(session_id).await {
            tracing::info!(session_id = %session_id, reason, "Viewer disconnected");
        }
    }
}
