//! Error taxonomy for the collaboration layer.

use thiserror::Error;

use crate::ws::RoomId;

/// WebSocket close code used for both "unauthorized" and "room not found".
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// WebSocket close code for handshakes that failed on our side.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

#[derive(Debug, Error)]
pub enum CollabError {
    /// Missing, invalid, expired or wrong-type token, or unknown/inactive user.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The room exists but belongs to another user.
    #[error("sheet {0} is not owned by the caller")]
    Forbidden(RoomId),

    #[error("sheet {0} not found")]
    NotFound(RoomId),

    /// Malformed inbound envelope. The message is dropped, the connection stays open.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Send/receive failure on an established connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// A collaborator (store, blocking task) failed during the handshake.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CollabError {
    /// Close code and reason sent to a client whose handshake was rejected.
    ///
    /// Forbidden rooms are reported as "room not found" so that a caller
    /// cannot probe for sheets owned by other users.
    pub fn close_frame(&self) -> (u16, &'static str) {
        match self {
            CollabError::Unauthenticated(_) => (CLOSE_POLICY_VIOLATION, "unauthorized"),
            CollabError::Forbidden(_) | CollabError::NotFound(_) => {
                (CLOSE_POLICY_VIOLATION, "room not found")
            }
            CollabError::Protocol(_) | CollabError::Transport(_) | CollabError::Internal(_) => {
                (CLOSE_INTERNAL_ERROR, "internal error")
            }
        }
    }
}

impl From<serde_json::Error> for CollabError {
    fn from(err: serde_json::Error) -> Self {
        CollabError::Protocol(err.to_string())
    }
}
