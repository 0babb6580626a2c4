#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::Message;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use qpulse_api::config::{SamplerConfig, ServerConfig, TransportConfig};
use qpulse_api::router::build_app_router;
use qpulse_api::state::AppState;
use qpulse_api::ws::SessionReceiver;
use qpulse_core::keys::KeyPatterns;
use qpulse_core::messages::ViewerMessage;
use qpulse_core::snapshot::QueueSnapshot;
use qpulse_store::{KeyCounter, StoreError};
use tokio::time::Instant;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin and a short poll wait so
/// empty polls return quickly.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        static_dir: None,
        sampler: SamplerConfig::default(),
        transport: TransportConfig {
            poll_wait: Duration::from_millis(200),
            poll_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(25),
        },
    }
}

pub fn test_state() -> AppState {
    AppState::new(test_config())
}

/// Build the full application router, with the same middleware stack as
/// production, over `state`.
pub fn build_test_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn send(app: &Router, method: Method, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Open a polling session through `POST /poll` and return its sid.
pub async fn open_poll_session(app: &Router) -> String {
    let response = post(app, "/poll").await;
    assert_eq!(response.status(), 200);
    let json = body_json(response).await;
    json["sid"].as_str().expect("sid should be a string").to_string()
}

// ---------------------------------------------------------------------------
// Session channel helpers
// ---------------------------------------------------------------------------

/// Pop the next queued viewer message without waiting, skipping pings.
pub fn next_message(rx: &mut SessionReceiver) -> Option<ViewerMessage> {
    while let Ok(frame) = rx.try_recv() {
        if let Message::Text(text) = frame {
            return Some(ViewerMessage::from_json(text.as_str()).unwrap());
        }
    }
    None
}

/// Drain every queued viewer message.
pub fn drain_messages(rx: &mut SessionReceiver) -> Vec<ViewerMessage> {
    std::iter::from_fn(|| next_message(rx)).collect()
}

// ---------------------------------------------------------------------------
// Fake store
// ---------------------------------------------------------------------------

/// In-memory [`KeyCounter`]: each pattern maps to a fixed count or a
/// failure. Unknown patterns count as 0.
#[derive(Default)]
pub struct FakeCounter {
    counts: Mutex<HashMap<String, Result<u64, String>>>,
    calls: AtomicUsize,
    /// When each count started.
    started: Mutex<Vec<Instant>>,
    /// How long each count takes.
    latency: Mutex<Duration>,
}

impl FakeCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, pattern: &str, count: u64) {
        self.counts.lock().unwrap().insert(pattern.to_string(), Ok(count));
    }

    pub fn fail(&self, pattern: &str, reason: &str) {
        self.counts
            .lock()
            .unwrap()
            .insert(pattern.to_string(), Err(reason.to_string()));
    }

    pub fn set_snapshot(&self, patterns: &KeyPatterns, snapshot: QueueSnapshot) {
        self.set(&patterns.in_progress, snapshot.in_progress);
        self.set(&patterns.retrying, snapshot.retrying);
        self.set(&patterns.queued, snapshot.queued);
        self.set(&patterns.finished, snapshot.finished);
        self.set(&patterns.workers, snapshot.workers);
    }

    pub fn fail_all(&self, patterns: &KeyPatterns, reason: &str) {
        for pattern in [
            &patterns.in_progress,
            &patterns.retrying,
            &patterns.queued,
            &patterns.finished,
            &patterns.workers,
        ] {
            self.fail(pattern, reason);
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Start instants of every `count_matching` call so far.
    pub fn call_starts(&self) -> Vec<Instant> {
        self.started.lock().unwrap().clone()
    }

    /// Number of `count_matching` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyCounter for FakeCounter {
    async fn count_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(Instant::now());
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let entry = self.counts.lock().unwrap().get(pattern).cloned();
        match entry {
            Some(Ok(count)) => Ok(count),
            Some(Err(reason)) => Err(StoreError::Unavailable {
                attempts: 1,
                reason,
            }),
            None => Ok(0),
        }
    }
}

/// The snapshot used throughout the sampler tests.
pub fn sample_snapshot() -> QueueSnapshot {
    QueueSnapshot {
        in_progress: 3,
        retrying: 0,
        queued: 5,
        finished: 12,
        workers: 2,
    }
}
