//! Long-polling fallback transport.
//!
//! Viewers that cannot hold a WebSocket open a session with `POST /poll`,
//! then repeatedly `GET /poll?sid=..` to drain queued frames. A polling
//! session can later be upgraded in place by opening `GET /ws?sid=..`: its
//! receiver (and anything still queued on it) moves to the socket and the
//! sid stops being pollable.
//!
//! A session that stops polling for longer than the poll timeout is reaped
//! by [`run_sweeper`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws::registry::{SessionReceiver, Transport};

/// One polling session's receiver.
///
/// `detached` is cancelled when the session leaves the polling transport
/// (upgrade, disconnect, expiry) so an in-flight poll returns at once.
struct PollSlot {
    rx: Mutex<Option<SessionReceiver>>,
    detached: CancellationToken,
}

struct PollEntry {
    slot: Arc<PollSlot>,
    last_seen: Instant,
}

/// Frames drained by one poll.
#[derive(Debug, Default)]
pub struct PollBatch {
    pub messages: Vec<String>,
    /// The session's channel was closed (server shutdown or removal).
    pub closed: bool,
}

pub struct PollSessions {
    entries: Mutex<HashMap<String, PollEntry>>,
    wait: Duration,
    timeout: Duration,
}

impl PollSessions {
    pub fn new(wait: Duration, timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            wait,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attach a registered session's receiver to the polling transport.
    pub async fn insert(&self, sid: String, rx: SessionReceiver) {
        let entry = PollEntry {
            slot: Arc::new(PollSlot {
                rx: Mutex::new(Some(rx)),
                detached: CancellationToken::new(),
            }),
            last_seen: Instant::now(),
        };
        self.entries.lock().await.insert(sid, entry);
    }

    /// Number of sessions currently attached through polling.
    pub async fn session_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Drain queued frames for `sid`, waiting up to the poll wait for the
    /// first one. Returns `None` for an unknown sid.
    pub async fn poll(&self, sid: &str) -> Option<PollBatch> {
        let slot = {
            let mut entries = self.entries.lock().await;
            let entry = entries.get_mut(sid)?;
            entry.last_seen = Instant::now();
            Arc::clone(&entry.slot)
        };

        let mut guard = slot.rx.lock().await;
        let rx = guard.as_mut()?;
        let mut batch = PollBatch::default();

        // Drain what is already queued; only wait when nothing is.
        loop {
            match rx.try_recv() {
                Ok(msg) => collect(&mut batch, msg),
                Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                    batch.closed = true;
                    break;
                }
            }
        }

        if batch.messages.is_empty() && !batch.closed {
            tokio::select! {
                _ = slot.detached.cancelled() => {}
                _ = tokio::time::sleep(self.wait) => {}
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        collect(&mut batch, msg);
                        while let Ok(more) = rx.try_recv() {
                            collect(&mut batch, more);
                        }
                    }
                    None => batch.closed = true,
                },
            }
        }
        drop(guard);

        if let Some(entry) = self.entries.lock().await.get_mut(sid) {
            entry.last_seen = Instant::now();
        }
        Some(batch)
    }

    /// Detach `sid` from polling and hand over its receiver (WebSocket
    /// upgrade). Returns `None` for an unknown sid.
    pub async fn take(&self, sid: &str) -> Option<SessionReceiver> {
        let entry = self.entries.lock().await.remove(sid)?;
        entry.slot.detached.cancel();
        let rx = entry.slot.rx.lock().await.take();
        rx
    }

    /// Detach `sid` and drop its receiver. Returns whether it existed.
    pub async fn remove(&self, sid: &str) -> bool {
        match self.entries.lock().await.remove(sid) {
            Some(entry) => {
                entry.slot.detached.cancel();
                true
            }
            None => false,
        }
    }

    /// Detach every session that has not polled within the poll timeout.
    /// Returns the expired sids.
    pub async fn reap_expired(&self) -> Vec<String> {
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.last_seen.elapsed() > self.timeout)
            .map(|(sid, _)| sid.clone())
            .collect();

        for sid in &expired {
            if let Some(entry) = entries.remove(sid) {
                entry.slot.detached.cancel();
            }
        }
        expired
    }
}

fn collect(batch: &mut PollBatch, msg: Message) {
    match msg {
        Message::Text(text) => batch.messages.push(text.as_str().to_owned()),
        Message::Close(_) => batch.closed = true,
        // Pings and binary frames have no meaning on this transport.
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SidQuery {
    pub sid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PollOpened {
    pub sid: String,
}

fn require_sid(query: SidQuery) -> AppResult<String> {
    query
        .sid
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("sid query parameter is required".into()))
}

/// POST /poll -- open a polling session.
pub async fn open(State(state): State<AppState>) -> AppResult<Json<PollOpened>> {
    let (sid, rx) = state.open_session(Transport::Polling).await?;
    state.polls.insert(sid.clone(), rx).await;
    Ok(Json(PollOpened { sid }))
}

/// GET /poll?sid= -- long-poll for queued frames.
pub async fn poll(
    State(state): State<AppState>,
    Query(query): Query<SidQuery>,
) -> AppResult<Json<Vec<String>>> {
    let sid = require_sid(query)?;
    let batch = state
        .polls
        .poll(&sid)
        .await
        .ok_or_else(|| AppError::SessionNotFound(sid.clone()))?;

    if batch.closed {
        state.polls.remove(&sid).await;
        state.close_session(&sid, "closed").await;
    }
    Ok(Json(batch.messages))
}

/// DELETE /poll?sid= -- graceful disconnect.
pub async fn close(
    State(state): State<AppState>,
    Query(query): Query<SidQuery>,
) -> AppResult<StatusCode> {
    let sid = require_sid(query)?;
    if !state.polls.remove(&sid).await {
        return Err(AppError::SessionNotFound(sid));
    }
    state.close_session(&sid, "client closed").await;
    Ok(StatusCode::NO_CONTENT)
}

/// Periodically deregister polling sessions that stopped polling.
///
/// Runs until `cancel` is triggered.
pub async fn run_sweeper(state: AppState, cancel: CancellationToken) {
    let period = (state.polls.timeout() / 2).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Poll sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                let expired = state.polls.reap_expired().await;
                for sid in &expired {
                    state.close_session(sid, "poll timeout").await;
                }
                if !expired.is_empty() {
                    let remaining = state.polls.session_count().await;
                    tracing::debug!(count = expired.len(), remaining, "Reaped idle polling sessions");
                }
            }
        }
    }
}
