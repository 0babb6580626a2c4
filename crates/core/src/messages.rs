//! The viewer-facing message envelope.
//!
//! Every frame pushed to a dashboard viewer is one JSON object tagged by
//! `type`. Only two shapes exist:
//!
//! ```text
//! { "type": "queue-update", "inProgress": 3, "retry": 0, "queued": 5, "finished": 12, "workers": 2 }
//! { "type": "message-connect", "message": true }
//! ```
//!
//! `queue-update` carries an `error` string only when the store was
//! unreachable for a whole sampling cycle.

use serde::{Deserialize, Serialize};

use crate::snapshot::QueueSnapshot;

/// Discriminator for snapshot frames.
pub const MSG_TYPE_QUEUE_UPDATE: &str = "queue-update";

/// Discriminator for the one-shot connect acknowledgment.
pub const MSG_TYPE_MESSAGE_CONNECT: &str = "message-connect";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewerMessage {
    #[serde(rename = "queue-update", rename_all = "camelCase")]
    QueueUpdate {
        in_progress: u64,
        retry: u64,
        queued: u64,
        finished: u64,
        workers: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "message-connect")]
    MessageConnect { message: bool },
}

impl ViewerMessage {
    /// Full-state update built from a sampled snapshot.
    pub fn queue_update(snapshot: &QueueSnapshot) -> Self {
        ViewerMessage::QueueUpdate {
            in_progress: snapshot.in_progress,
            retry: snapshot.retrying,
            queued: snapshot.queued,
            finished: snapshot.finished,
            workers: snapshot.workers,
            error: None,
        }
    }

    /// Zeroed update flagged with the reason the store could not be read.
    pub fn degraded(error: impl Into<String>) -> Self {
        ViewerMessage::QueueUpdate {
            in_progress: 0,
            retry: 0,
            queued: 0,
            finished: 0,
            workers: 0,
            error: Some(error.into()),
        }
    }

    /// Acknowledgment sent once to every newly registered session.
    pub fn connected() -> Self {
        ViewerMessage::MessageConnect { message: true }
    }

    /// The `type` tag this message serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            ViewerMessage::QueueUpdate { .. } => MSG_TYPE_QUEUE_UPDATE,
            ViewerMessage::MessageConnect { .. } => MSG_TYPE_MESSAGE_CONNECT,
        }
    }

    /// Serialize to the text frame sent over the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a text frame. Used by viewers and tests.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The snapshot carried by a `queue-update`, if any.
    pub fn snapshot(&self) -> Option<QueueSnapshot> {
        match self {
            ViewerMessage::QueueUpdate {
                in_progress,
                retry,
                queued,
                finished,
                workers,
                ..
            } => Some(QueueSnapshot {
                in_progress: *in_progress,
                retrying: *retry,
                queued: *queued,
                finished: *finished,
                workers: *workers,
            }),
            ViewerMessage::MessageConnect { .. } => None,
        }
    }
}
