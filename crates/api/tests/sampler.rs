//! Tests for the queue sampler: change detection, degraded mode, recovery
//! and the run loop.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{drain_messages, next_message, sample_snapshot, FakeCounter};
use qpulse_api::background::sampler::{Sampler, TickOutcome};
use qpulse_api::ws::{BroadcastHub, SessionRegistry, Transport};
use qpulse_core::keys::KeyPatterns;
use qpulse_core::messages::ViewerMessage;
use qpulse_core::snapshot::QueueSnapshot;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Fixture {
    sampler: Sampler,
    counter: Arc<FakeCounter>,
    registry: Arc<SessionRegistry>,
    patterns: KeyPatterns,
}

fn fixture() -> Fixture {
    let registry = Arc::new(SessionRegistry::new());
    let counter = FakeCounter::new();
    let patterns = KeyPatterns::default();
    let sampler = Sampler::new(
        counter.clone(),
        BroadcastHub::new(Arc::clone(&registry)),
        patterns.clone(),
    );
    Fixture {
        sampler,
        counter,
        registry,
        patterns,
    }
}

// ---------------------------------------------------------------------------
// Test: no viewers means the store is never queried
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tick_without_viewers_is_skipped() {
    let mut f = fixture();
    f.counter.set_snapshot(&f.patterns, sample_snapshot());

    assert_eq!(f.sampler.tick().await, TickOutcome::Skipped);
    assert_eq!(f.counter.calls(), 0);
    assert_eq!(f.sampler.last_broadcast(), QueueSnapshot::EMPTY);
}

// ---------------------------------------------------------------------------
// Test: a changed snapshot is broadcast once, the same snapshot is not
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_snapshot_is_broadcast_once() {
    let mut f = fixture();
    let mut rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    f.counter.set_snapshot(&f.patterns, sample_snapshot());

    assert_eq!(f.sampler.tick().await, TickOutcome::Broadcast(sample_snapshot()));
    assert_eq!(f.sampler.tick().await, TickOutcome::Unchanged);

    let messages = drain_messages(&mut rx);
    assert_eq!(messages.len(), 1, "expected exactly one broadcast: {messages:?}");
    assert_eq!(messages[0], ViewerMessage::queue_update(&sample_snapshot()));
    assert_eq!(f.counter.calls(), 10);
}

#[tokio::test]
async fn empty_store_matches_initial_snapshot() {
    let mut f = fixture();
    let mut rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;

    assert_eq!(f.sampler.tick().await, TickOutcome::Unchanged);
    assert!(next_message(&mut rx).is_none());
}

// ---------------------------------------------------------------------------
// Test: a single field change carries the full snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_field_change_broadcasts_full_snapshot() {
    let mut f = fixture();
    let mut rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    f.sampler.tick().await;
    drain_messages(&mut rx);

    f.counter.set(&f.patterns.finished, 13);
    let expected = QueueSnapshot {
        finished: 13,
        ..sample_snapshot()
    };
    assert_eq!(f.sampler.tick().await, TickOutcome::Broadcast(expected));

    let json: serde_json::Value =
        serde_json::from_str(&next_message(&mut rx).unwrap().to_json().unwrap()).unwrap();
    assert_eq!(json["type"], "queue-update");
    assert_eq!(json["inProgress"], 3);
    assert_eq!(json["retry"], 0);
    assert_eq!(json["queued"], 5);
    assert_eq!(json["finished"], 13);
    assert_eq!(json["workers"], 2);
    assert_eq!(f.sampler.last_broadcast(), expected);
}

// ---------------------------------------------------------------------------
// Test: partial failures read as zero
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_count_reads_as_zero() {
    let mut f = fixture();
    let _rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    f.counter.fail(&f.patterns.queued, "timeout");

    let outcome = f.sampler.tick().await;
    assert_matches!(
        outcome,
        TickOutcome::Broadcast(QueueSnapshot { queued: 0, in_progress: 3, finished: 12, .. })
    );
}

// ---------------------------------------------------------------------------
// Test: total outage broadcasts a degraded update on every tick
// ---------------------------------------------------------------------------

#[tokio::test]
async fn total_outage_broadcasts_degraded_update_every_tick() {
    let mut f = fixture();
    let mut rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    f.sampler.tick().await;
    drain_messages(&mut rx);

    f.counter.fail_all(&f.patterns, "Connection refused");

    for _ in 0..2 {
        let outcome = f.sampler.tick().await;
        assert_matches!(outcome, TickOutcome::Degraded(ref e) if e.contains("Connection refused"));

        let message = next_message(&mut rx).expect("degraded update should be delivered");
        assert_matches!(
            message,
            ViewerMessage::QueueUpdate {
                in_progress: 0,
                retry: 0,
                queued: 0,
                finished: 0,
                workers: 0,
                error: Some(ref e),
            } if !e.is_empty()
        );
    }

    // The last real snapshot is kept across the outage.
    assert_eq!(f.sampler.last_broadcast(), sample_snapshot());
}

#[tokio::test]
async fn recovery_rebroadcasts_even_when_counts_are_unchanged() {
    let mut f = fixture();
    let mut rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    f.sampler.tick().await;

    f.counter.fail_all(&f.patterns, "Connection refused");
    f.sampler.tick().await;
    drain_messages(&mut rx);

    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    assert_eq!(f.sampler.tick().await, TickOutcome::Broadcast(sample_snapshot()));
    assert_eq!(
        next_message(&mut rx),
        Some(ViewerMessage::queue_update(&sample_snapshot()))
    );

    // Back to normal change detection afterwards.
    assert_eq!(f.sampler.tick().await, TickOutcome::Unchanged);
}

// ---------------------------------------------------------------------------
// Test: a viewer registered later does not see earlier broadcasts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_viewer_does_not_receive_earlier_broadcast() {
    let mut f = fixture();
    let mut early = f.registry.add("early".into(), Transport::WebSocket).await;
    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    f.sampler.tick().await;

    let mut late = f.registry.add("late".into(), Transport::Polling).await;
    assert_eq!(f.sampler.tick().await, TickOutcome::Unchanged);

    assert_eq!(drain_messages(&mut early).len(), 1);
    assert!(next_message(&mut late).is_none());
}

// ---------------------------------------------------------------------------
// Test: run loop reacts to a nudge and stops on cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_loop_samples_on_nudge_and_stops_on_cancel() {
    let f = fixture();
    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    let nudge = Arc::new(Notify::new());
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(f.sampler.run(
        Duration::from_secs(3600),
        Arc::clone(&nudge),
        cancel.clone(),
    ));

    let mut rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    nudge.notify_one();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("nudged sampler should broadcast without waiting the interval")
        .expect("channel should stay open");
    assert_matches!(received, axum::extract::ws::Message::Text(_));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("sampler should stop after cancellation")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: the first tick with viewers after skipped ticks always broadcasts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_viewer_after_idle_gets_current_snapshot() {
    let mut f = fixture();
    let mut first = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    f.sampler.tick().await;
    drain_messages(&mut first);

    // Everybody leaves; ticks are skipped while the store keeps its counts.
    f.registry.remove("viewer-1").await;
    assert_eq!(f.sampler.tick().await, TickOutcome::Skipped);

    let mut next = f.registry.add("viewer-2".into(), Transport::Polling).await;
    assert_eq!(f.sampler.tick().await, TickOutcome::Broadcast(sample_snapshot()));
    assert_eq!(
        next_message(&mut next),
        Some(ViewerMessage::queue_update(&sample_snapshot()))
    );

    // Only the first tick after idling is forced.
    assert_eq!(f.sampler.tick().await, TickOutcome::Unchanged);
}

// ---------------------------------------------------------------------------
// Test: scheduling of the run loop
// ---------------------------------------------------------------------------

/// Group the counter's call starts into tick starts (five counts per tick).
fn tick_starts(counter: &FakeCounter) -> Vec<tokio::time::Instant> {
    let starts = counter.call_starts();
    assert_eq!(starts.len() % 5, 0, "ticks must issue all five counts");
    starts.chunks(5).map(|tick| tick[0]).collect()
}

#[tokio::test(start_paused = true)]
async fn next_tick_starts_a_fixed_delay_after_the_previous_one_ends() {
    let f = fixture();
    let _rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    let latency = Duration::from_millis(300);
    let interval = Duration::from_secs(1);
    f.counter.set_latency(latency);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(f.sampler.run(interval, Arc::new(Notify::new()), cancel.clone()));

    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();
    handle.await.unwrap();

    let starts = tick_starts(&f.counter);
    assert!(starts.len() >= 3, "expected several ticks, got {}", starts.len());
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= latency + interval, "ticks started {gap:?} apart");
    }
}

#[tokio::test(start_paused = true)]
async fn nudges_cannot_outpace_the_interval() {
    let f = fixture();
    let _rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    let interval = Duration::from_secs(1);
    let nudge = Arc::new(Notify::new());
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(f.sampler.run(interval, Arc::clone(&nudge), cancel.clone()));

    // Viewers connecting constantly for three intervals.
    let churn_until = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < churn_until {
        nudge.notify_one();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    handle.await.unwrap();

    let starts = tick_starts(&f.counter);
    assert!(starts.len() <= 4, "{} ticks in three intervals", starts.len());
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= interval, "ticks started {:?} apart", pair[1] - pair[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn nudge_after_skipped_tick_samples_immediately() {
    let f = fixture();
    f.counter.set_snapshot(&f.patterns, sample_snapshot());
    let nudge = Arc::new(Notify::new());
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(f.sampler.run(
        Duration::from_secs(60),
        Arc::clone(&nudge),
        cancel.clone(),
    ));
    // Let the first (skipped) tick run.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(f.counter.calls(), 0);

    let mut rx = f.registry.add("viewer-1".into(), Transport::WebSocket).await;
    nudge.notify_one();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(f.counter.calls(), 5);
    assert_eq!(next_message(&mut rx), Some(ViewerMessage::queue_update(&sample_snapshot())));

    cancel.cancel();
    handle.await.unwrap();
}
