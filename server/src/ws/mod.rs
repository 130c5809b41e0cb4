pub mod actor;
pub mod broadcast;
pub mod gateway;
pub mod handler;
pub mod protocol;
pub mod registry;

use axum::extract::ws::Message;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use uuid::Uuid;

/// Sheet id; each sheet is one collaboration room.
pub type RoomId = i64;

pub type UserId = i64;

pub type ConnectionId = Uuid;

/// Sender half of a connection's bounded outbound queue.
/// The connection's writer task drains the receiver into the socket.
pub type ConnectionSender = mpsc::Sender<Message>;

/// Result of a non-blocking push into a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The peer is not draining its queue fast enough.
    QueueFull,
    /// The writer task is gone, so the socket is gone too.
    Closed,
}

impl SendOutcome {
    pub fn is_delivered(self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// Handle to one live connection.
///
/// Clones share the same outbound queue and close signal, so the registry,
/// the broadcast engine and the connection's own task can all hold one.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    sender: ConnectionSender,
    shutdown: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, username: impl Into<String>, sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            username: username.into(),
            sender,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Push a frame without waiting. Never blocks the caller.
    pub fn try_send(&self, msg: Message) -> SendOutcome {
        match self.sender.try_send(msg) {
            Ok(()) => SendOutcome::Delivered,
            Err(TrySendError::Full(_)) => SendOutcome::QueueFull,
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Ask the task that owns this connection to shut it down.
    /// The permit is kept if the task is not currently waiting on it.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once `close` has been called on any clone of this handle.
    pub async fn closed(&self) {
        self.shutdown.notified().await;
    }
}
