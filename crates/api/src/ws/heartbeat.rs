use std::sync::Arc;
use std::time::Duration;

use crate::ws::registry::SessionRegistry;

/// Spawn a background task that sends periodic Ping frames to all
/// WebSocket viewers.
///
/// The returned `JoinHandle` is aborted during shutdown.
pub fn start_heartbeat(
    registry: Arc<SessionRegistry>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;
            let count = registry.connection_count().await;
            tracing::debug!(count, "Viewer heartbeat ping");
            registry.ping_all().await;
        }
    })
}
