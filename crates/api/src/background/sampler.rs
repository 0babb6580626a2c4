//! Queue sampling loop.
//!
//! Every tick counts the five key patterns concurrently, folds the results
//! into a [`QueueSnapshot`] and broadcasts it as `queue-update` only when it
//! differs from the last snapshot sent. Ticks never overlap: the next one is
//! scheduled a fixed delay after the previous one finishes, so a slow store
//! slows sampling down instead of piling queries up.
//!
//! Failure handling:
//! - a single failed count is logged and read as `0`;
//! - if all five fail the store is treated as unreachable and a zeroed
//!   `queue-update` carrying `error` is broadcast on every such tick;
//! - the first healthy tick after an outage always broadcasts, even when
//!   the counts match the last snapshot, so viewers drop the error state.
//!
//! The same forced broadcast happens on the first tick that finds viewers
//! after ticks were skipped for lack of them.

use std::sync::Arc;
use std::time::Duration;

use qpulse_core::keys::{
    KeyPatterns, METRIC_FINISHED, METRIC_IN_PROGRESS, METRIC_QUEUED, METRIC_RETRYING,
    METRIC_WORKERS,
};
use qpulse_core::messages::ViewerMessage;
use qpulse_core::snapshot::QueueSnapshot;
use qpulse_store::{KeyCounter, StoreError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ws::BroadcastHub;

/// What a single tick decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No viewers are connected; the store was not queried.
    Skipped,
    /// The snapshot matched the last broadcast.
    Unchanged,
    /// A new snapshot was broadcast.
    Broadcast(QueueSnapshot),
    /// Every count failed; a degraded update with this error was broadcast.
    Degraded(String),
}

pub struct Sampler {
    counter: Arc<dyn KeyCounter>,
    hub: BroadcastHub,
    patterns: KeyPatterns,
    /// Last snapshot sent to viewers. Only `tick` touches it.
    last: QueueSnapshot,
    /// The previous tick broadcast a degraded update.
    degraded: bool,
    /// The previous tick was skipped; `last` may not reflect the store.
    idle: bool,
}

impl Sampler {
    pub fn new(counter: Arc<dyn KeyCounter>, hub: BroadcastHub, patterns: KeyPatterns) -> Self {
        Self {
            counter,
            hub,
            patterns,
            last: QueueSnapshot::EMPTY,
            degraded: false,
            idle: false,
        }
    }

    pub fn last_broadcast(&self) -> QueueSnapshot {
        self.last
    }

    /// Run one sampling cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.hub.session_count().await == 0 {
            self.idle = true;
            return TickOutcome::Skipped;
        }

        let snapshot = match self.sample().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.degraded = true;
                let delivered = self.hub.broadcast(&ViewerMessage::degraded(error.clone())).await;
                tracing::warn!(error = %error, delivered, "Store unreachable, sent degraded update");
                return TickOutcome::Degraded(error);
            }
        };

        let forced = self.degraded || self.idle;
        self.idle = false;
        if !snapshot.differs_from(&self.last) && !forced {
            return TickOutcome::Unchanged;
        }

        self.last = snapshot;
        self.degraded = false;
        let delivered = self.hub.broadcast(&ViewerMessage::queue_update(&snapshot)).await;
        tracing::info!(
            in_progress = snapshot.in_progress,
            retrying = snapshot.retrying,
            queued = snapshot.queued,
            finished = snapshot.finished,
            workers = snapshot.workers,
            delivered,
            "Sent queue update",
        );
        TickOutcome::Broadcast(snapshot)
    }

    /// Count all five patterns concurrently.
    ///
    /// Returns the error text when every count failed.
    async fn sample(&self) -> Result<QueueSnapshot, String> {
        let p = &self.patterns;
        let (in_progress, retrying, queued, finished, workers) = tokio::join!(
            self.count(METRIC_IN_PROGRESS, &p.in_progress),
            self.count(METRIC_RETRYING, &p.retrying),
            self.count(METRIC_QUEUED, &p.queued),
            self.count(METRIC_FINISHED, &p.finished),
            self.count(METRIC_WORKERS, &p.workers),
        );

        let results = [&in_progress, &retrying, &queued, &finished, &workers];
        if results.iter().all(|r| r.is_err()) {
            let error = results
                .iter()
                .find_map(|r| r.as_ref().err())
                .map(ToString::to_string)
                .unwrap_or_else(|| "store unavailable".to_string());
            return Err(error);
        }

        Ok(QueueSnapshot {
            in_progress: in_progress.unwrap_or(0),
            retrying: retrying.unwrap_or(0),
            queued: queued.unwrap_or(0),
            finished: finished.unwrap_or(0),
            workers: workers.unwrap_or(0),
        })
    }

    async fn count(&self, metric: &'static str, pattern: &str) -> Result<u64, StoreError> {
        let result = self.counter.count_matching(pattern).await;
        if let Err(e) = &result {
            tracing::warn!(metric, pattern, error = %e, "Count failed, using 0");
        }
        result
    }

    /// Run the sampling loop until `cancel` is triggered.
    ///
    /// Each tick starts `interval` after the previous one finished.
    /// Cancellation is only observed between ticks; an in-flight tick runs to
    /// completion so a partial snapshot is never broadcast.
    ///
    /// `nudge` (a first viewer connected) cuts the wait short, but only when
    /// the previous tick was skipped or started at least `interval` ago, so
    /// ticks that query the store never run closer together than `interval`.
    pub async fn run(mut self, interval: Duration, nudge: Arc<Notify>, cancel: CancellationToken) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Sampler started");

        'ticks: while !cancel.is_cancelled() {
            let started = Instant::now();
            let outcome = self.tick().await;
            tracing::trace!(?outcome, "Sampler tick complete");

            let next_tick = Instant::now() + interval;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'ticks,
                    _ = tokio::time::sleep_until(next_tick) => break,
                    _ = nudge.notified() => {
                        if outcome == TickOutcome::Skipped || started.elapsed() >= interval {
                            tracing::debug!("Sampler nudged");
                            break;
                        }
                        tracing::trace!("Ignoring nudge, sampled recently");
                    }
                }
            }
        }

        tracing::info!("Sampler stopped");
    }
}
