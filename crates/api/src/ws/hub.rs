use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes};
use qpulse_core::messages::ViewerMessage;

use crate::ws::registry::SessionRegistry;

/// Fans viewer messages out to registered sessions.
///
/// Delivery is fire-and-forget: each session gets an independent,
/// non-blocking channel send, a closed channel is skipped, and nothing is
/// retried. Sessions are never removed here; that is driven by the
/// transport's disconnect.
#[derive(Clone)]
pub struct BroadcastHub {
    registry: Arc<SessionRegistry>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn session_count(&self) -> usize {
        self.registry.connection_count().await
    }

    /// Deliver `message` to every currently registered session.
    ///
    /// The message is serialized once. Returns how many sessions accepted
    /// the frame.
    pub async fn broadcast(&self, message: &ViewerMessage) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };

        let mut delivered = 0;
        self.registry
            .for_each(|id, sender| {
                if sender.send(Message::Text(text.clone())).is_ok() {
                    delivered += 1;
                } else {
                    tracing::trace!(session_id = %id, "Skipping closed session");
                }
            })
            .await;

        tracing::debug!(kind = message.kind(), delivered, "Broadcast complete");
        delivered
    }

    /// Deliver `message` to a single session. Returns whether it was queued.
    pub async fn send_to(&self, session_id: &str, message: &ViewerMessage) -> bool {
        let Some(text) = encode(message) else {
            return false;
        };
        match self.registry.sender(session_id).await {
            Some(sender) => sender.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }
}

fn encode(message: &ViewerMessage) -> Option<Utf8Bytes> {
    match message.to_json() {
        Ok(json) => Some(Utf8Bytes::from(json)),
        Err(e) => {
            tracing::error!(kind = message.kind(), error = %e, "Failed to serialize viewer message");
            None
        }
    }
}
