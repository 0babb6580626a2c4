use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;
use crate::ws::Transport;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Registered viewer sessions across both transports.
    pub viewers: usize,
    /// Of which attached through long polling.
    pub polling: usize,
}

/// GET /health -- returns service status and viewer counts.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        viewers: state.registry.connection_count().await,
        polling: state.registry.count_by_transport(Transport::Polling).await,
    })
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
