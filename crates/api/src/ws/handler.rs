use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws::poll::SidQuery;
use crate::ws::registry::{SessionReceiver, Transport};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// Without a `sid` a brand-new session is registered once the upgrade
/// completes. With `?sid=` an existing polling session is moved onto the
/// socket: it keeps its id and any frames still queued for it.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<SidQuery>,
) -> AppResult<Response> {
    let sid = query.sid.filter(|s| !s.trim().is_empty());

    let Some(sid) = sid else {
        return Ok(ws
            .on_upgrade(move |socket| async move {
                match state.open_session(Transport::WebSocket).await {
                    Ok((session_id, rx)) => handle_socket(socket, state, session_id, rx).await,
                    Err(e) => tracing::error!(error = %e, "Failed to open WebSocket session"),
                }
            })
            .into_response());
    };

    let rx = state
        .polls
        .take(&sid)
        .await
        .ok_or_else(|| AppError::SessionNotFound(sid.clone()))?;
    state.registry.set_transport(&sid, Transport::WebSocket).await;
    tracing::info!(session_id = %sid, "Polling session upgraded to WebSocket");

    let failed_state = state.clone();
    let failed_sid = sid.clone();
    Ok(ws
        .on_failed_upgrade(move |e: axum::Error| {
            tracing::debug!(session_id = %failed_sid, error = %e, "WebSocket upgrade failed");
            tokio::spawn(async move {
                failed_state.close_session(&failed_sid, "upgrade failed").await;
            });
        })
        .on_upgrade(move |socket| handle_socket(socket, state, sid, rx))
        .into_response())
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Spawns a sender task that forwards frames from the session channel.
///   2. Reads inbound frames on the current task until close or error.
///   3. Deregisters the session on disconnect.
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    session_id: String,
    mut rx: SessionReceiver,
) {
    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel frames to the WebSocket sink.
    let sender_session_id = session_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(session_id = %sender_session_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Receiver loop. Viewers have nothing to say; anything they send is
    // dropped without affecting the connection.
    let mut reason = "client closed";
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(session_id = %session_id, "Pong received");
            }
            Ok(Message::Text(text)) => {
                tracing::trace!(session_id = %session_id, len = text.as_str().len(), "Ignoring inbound text frame");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                reason = "transport error";
                break;
            }
        }
    }

    state.close_session(&session_id, reason).await;
    send_task.abort();
}
