use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::error::CollabError;
use crate::state::AppState;
use crate::ws::gateway::Admission;
use crate::ws::protocol::{self, ServerMessage};
use crate::ws::ConnectionHandle;

/// Pongs buffered between the reader and the ping task. Extra ones are dropped.
const PONG_QUEUE_CAPACITY: usize = 8;

/// How long a server-initiated close waits for queued frames to be written.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Close code sent when the server shuts a live session down (going away).
const CLOSE_GOING_AWAY: u16 = 1001;

/// Run one admitted connection until it closes.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the bounded outbound queue
/// - Reader loop: handles inbound frames one at a time, so a sender's
///   messages are relayed in the order they arrived
///
/// The connection leaves its room on every exit path; if it was already
/// reaped by the broadcast engine the leave is a no-op.
pub async fn run_connection(socket: WebSocket, state: AppState, admission: Admission) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(state.settings.outbound_queue_capacity);

    let room_id = admission.room_id;
    let conn = ConnectionHandle::new(admission.user_id, admission.username, tx.clone());

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let joined = state.broadcast.join(room_id, &conn);

    tracing::info!(
        sheet_id = room_id,
        user_id = conn.user_id,
        conn_id = %conn.id,
        members = joined.member_count,
        "Collaboration session started"
    );

    // Initial state goes to the new member only
    state.broadcast.send_to(
        &conn,
        &ServerMessage::Connected {
            sheet_id: room_id,
            active_users: joined.presence,
        },
    );

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::channel::<Bytes>(PONG_QUEUE_CAPACITY);

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_conn = conn.clone();
    let settings = state.settings;
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(settings.ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;
        let mut sequence: u64 = 0;

        loop {
            ping_timer.tick().await;
            sequence += 1;
            let payload = Bytes::copy_from_slice(&sequence.to_be_bytes());

            discard_stale_pongs(&mut pong_rx);
            if ping_tx.send(Message::Ping(payload.clone())).await.is_err() {
                // Writer task has died, connection is gone
                break;
            }

            if !await_pong(&mut pong_rx, &payload, settings.pong_timeout).await {
                tracing::warn!(conn_id = %ping_conn.id, "Pong timeout, closing connection");
                let _ = ping_tx.try_send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Pong timeout".into(),
                })));
                ping_conn.close();
                break;
            }
        }
    });

    let closed_by_server = loop {
        tokio::select! {
            _ = conn.closed() => {
                tracing::info!(
                    sheet_id = room_id,
                    conn_id = %conn.id,
                    "Connection closed by server"
                );
                break true;
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    protocol::handle_text_message(text.as_str(), &conn, room_id, &state.broadcast);
                }
                Some(Ok(Message::Binary(data))) => {
                    let err = CollabError::Protocol(format!("binary frame of {} bytes", data.len()));
                    tracing::warn!(
                        sheet_id = room_id,
                        conn_id = %conn.id,
                        error = %err,
                        "Dropping frame, only JSON text frames are accepted"
                    );
                }
                Some(Ok(Message::Pong(data))) => {
                    let _ = pong_tx.try_send(data);
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.try_send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        sheet_id = room_id,
                        conn_id = %conn.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break false;
                }
                Some(Err(e)) => {
                    let err = CollabError::Transport(e.to_string());
                    tracing::warn!(
                        sheet_id = room_id,
                        conn_id = %conn.id,
                        error = %err,
                        "WebSocket receive error"
                    );
                    break false;
                }
                None => {
                    tracing::info!(sheet_id = room_id, conn_id = %conn.id, "WebSocket stream ended");
                    break false;
                }
            }
        }
    };

    ping_handle.abort();

    if let Some(departure) = state.rooms.leave(conn.id) {
        state
            .broadcast
            .fanout(room_id, &ServerMessage::user_left(&departure), None);
    }

    if closed_by_server {
        // A pong timeout has already queued its own close frame; the writer
        // stops after the first one.
        let _ = tx.try_send(Message::Close(Some(CloseFrame {
            code: CLOSE_GOING_AWAY,
            reason: "Session closed".into(),
        })));
        drop(tx);
        if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle).await.is_err() {
            writer_handle.abort();
        }
    } else {
        writer_handle.abort();
    }

    tracing::info!(
        sheet_id = room_id,
        user_id = conn.user_id,
        conn_id = %conn.id,
        "Collaboration session stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
/// Stops after writing a close frame.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
        if is_close {
            break;
        }
    }
}

/// Drop pongs that arrived before the next ping goes out.
fn discard_stale_pongs(pong_rx: &mut mpsc::Receiver<Bytes>) {
    while pong_rx.try_recv().is_ok() {}
}

/// Wait for the pong echoing `payload`. Pongs with any other payload are ignored.
async fn await_pong(
    pong_rx: &mut mpsc::Receiver<Bytes>,
    payload: &Bytes,
    wait: Duration,
) -> bool {
    let matched = async {
        while let Some(pong) = pong_rx.recv().await {
            if pong == *payload {
                return true;
            }
        }
        false
    };
    timeout(wait, matched).await.unwrap_or(false)
}
