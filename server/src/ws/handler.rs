use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::error::CollabError;
use crate::state::AppState;
use crate::ws::{actor, RoomId};

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=JWT; a missing token is rejected after upgrade.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws/collaborate/{sheet_id}?token=JWT
///
/// Runs the handshake before accepting the upgrade. On success the
/// connection joins the sheet's room. On failure the socket is upgraded only
/// to deliver a close frame (1008 + reason), and the registry is not touched.
/// A handshake that exceeds the configured timeout is aborted without upgrading.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(sheet_id): Path<RoomId>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let gateway = state.gateway.clone();
    let handshake =
        tokio::task::spawn_blocking(move || gateway.admit(sheet_id, params.token.as_deref()));

    let result = match tokio::time::timeout(state.settings.handshake_timeout, handshake).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(CollabError::Internal(format!("Task join: {}", join_err))),
        Err(_) => {
            tracing::warn!(sheet_id, "WebSocket handshake timed out");
            return StatusCode::GATEWAY_TIMEOUT.into_response();
        }
    };

    match result {
        Ok(admission) => {
            tracing::info!(
                sheet_id,
                user_id = admission.user_id,
                "WebSocket connection admitted"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, admission))
        }
        Err(err) => {
            let (close_code, reason) = err.close_frame();
            tracing::warn!(
                sheet_id,
                close_code,
                reason,
                error = %err,
                "WebSocket handshake rejected"
            );

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
