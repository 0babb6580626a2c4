pub mod health;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the viewer transport routes.
///
/// ```text
/// /ws          GET     WebSocket upgrade (optionally ?sid= to upgrade a polling session)
/// /poll        POST    open a polling session
/// /poll        GET     long-poll queued frames (?sid=)
/// /poll        DELETE  close a polling session (?sid=)
/// ```
pub fn viewer_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route(
            "/poll",
            get(ws::poll::poll)
                .post(ws::poll::open)
                .delete(ws::poll::close),
        )
}
