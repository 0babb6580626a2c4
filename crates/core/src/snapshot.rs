use serde::{Deserialize, Serialize};

/// Aggregate queue and worker counts taken in one sampling pass.
///
/// The five counts are read independently from the store, so a snapshot is
/// only best-effort consistent. It is a full-state value: viewers replace
/// whatever they showed before with it, never apply it as a delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub in_progress: u64,
    pub retrying: u64,
    pub queued: u64,
    pub finished: u64,
    pub workers: u64,
}

impl QueueSnapshot {
    /// The all-zero snapshot, used before the first broadcast and as the
    /// degraded value when the store is unreachable.
    pub const EMPTY: QueueSnapshot = QueueSnapshot {
        in_progress: 0,
        retrying: 0,
        queued: 0,
        finished: 0,
        workers: 0,
    };

    /// Whether any field differs from `previous`.
    pub fn differs_from(&self, previous: &QueueSnapshot) -> bool {
        self != previous
    }
}
