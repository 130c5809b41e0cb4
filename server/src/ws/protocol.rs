//! JSON envelope codec and inbound dispatch.
//!
//! Every frame is one JSON object with a `type` tag. Inbound kinds form a
//! closed set with an explicit `Unknown` variant so that newer clients can send
//! kinds this server does not know yet without being treated as malformed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::broadcast::BroadcastEngine;
use super::registry::{Departure, Presence};
use super::{ConnectionHandle, RoomId, UserId};
use crate::error::CollabError;

/// Messages a client may send.
///
/// Identity fields supplied by the client are not part of these variants and
/// are dropped during decoding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CellUpdate {
        row: u64,
        column: u64,
        value: Value,
        timestamp: i64,
    },
    CursorMove {
        row: u64,
        column: u64,
    },
    Selection {
        start_row: u64,
        start_column: u64,
        end_row: u64,
        end_column: u64,
    },
    Comment {
        row: u64,
        column: u64,
        text: String,
        timestamp: i64,
    },
    #[serde(other)]
    Unknown,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent only to a newly admitted connection.
    Connected {
        sheet_id: RoomId,
        active_users: Vec<Presence>,
    },
    UserJoined {
        user_id: UserId,
        username: String,
        /// Member connection count after the join.
        active_users: usize,
    },
    UserLeft {
        user_id: UserId,
        username: String,
        /// Member connection count after the departure.
        active_users: usize,
    },
    CellUpdate {
        user_id: UserId,
        username: String,
        row: u64,
        column: u64,
        value: Value,
        timestamp: i64,
    },
    CursorMove {
        user_id: UserId,
        username: String,
        row: u64,
        column: u64,
    },
    Selection {
        user_id: UserId,
        username: String,
        start_row: u64,
        start_column: u64,
        end_row: u64,
        end_column: u64,
    },
    Comment {
        user_id: UserId,
        username: String,
        row: u64,
        column: u64,
        text: String,
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn user_joined(user_id: UserId, username: &str, member_count: usize) -> Self {
        ServerMessage::UserJoined {
            user_id,
            username: username.to_string(),
            active_users: member_count,
        }
    }

    pub fn user_left(departure: &Departure) -> Self {
        ServerMessage::UserLeft {
            user_id: departure.user_id,
            username: departure.username.clone(),
            active_users: departure.remaining,
        }
    }

    /// The wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::UserJoined { .. } => "user_joined",
            ServerMessage::UserLeft { .. } => "user_left",
            ServerMessage::CellUpdate { .. } => "cell_update",
            ServerMessage::CursorMove { .. } => "cursor_move",
            ServerMessage::Selection { .. } => "selection",
            ServerMessage::Comment { .. } => "comment",
        }
    }
}

impl ClientMessage {
    /// Turn an inbound message into the outbound event for the rest of the
    /// room, stamped with the sender's server-side identity.
    /// Returns `None` for kinds that are not relayed.
    pub fn dispatch(self, user_id: UserId, username: &str) -> Option<ServerMessage> {
        let username = username.to_string();
        match self {
            ClientMessage::CellUpdate {
                row,
                column,
                value,
                timestamp,
            } => Some(ServerMessage::CellUpdate {
                user_id,
                username,
                row,
                column,
                value,
                timestamp,
            }),
            ClientMessage::CursorMove { row, column } => Some(ServerMessage::CursorMove {
                user_id,
                username,
                row,
                column,
            }),
            ClientMessage::Selection {
                start_row,
                start_column,
                end_row,
                end_column,
            } => Some(ServerMessage::Selection {
                user_id,
                username,
                start_row,
                start_column,
                end_row,
                end_column,
            }),
            ClientMessage::Comment {
                row,
                column,
                text,
                timestamp,
            } => Some(ServerMessage::Comment {
                user_id,
                username,
                row,
                column,
                text,
                timestamp,
            }),
            ClientMessage::Unknown => None,
        }
    }
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<ClientMessage, CollabError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode one outbound message as the text of a frame.
pub fn encode(message: &ServerMessage) -> Result<String, CollabError> {
    Ok(serde_json::to_string(message)?)
}

/// Handle one inbound text frame from `sender`: decode, stamp, and fan out to
/// the rest of the room. Malformed frames are logged and dropped.
pub fn handle_text_message(
    text: &str,
    sender: &ConnectionHandle,
    room_id: RoomId,
    engine: &BroadcastEngine,
) {
    let message = match decode(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                sheet_id = room_id,
                user_id = sender.user_id,
                conn_id = %sender.id,
                error = %e,
                "Dropping malformed message"
            );
            return;
        }
    };

    match message.dispatch(sender.user_id, &sender.username) {
        Some(event) => {
            let delivered = engine.fanout(room_id, &event, Some(sender.id));
            tracing::debug!(
                sheet_id = room_id,
                user_id = sender.user_id,
                kind = event.kind(),
                delivered,
                "Relayed message"
            );
        }
        None => {
            tracing::debug!(
                sheet_id = room_id,
                user_id = sender.user_id,
                "Ignoring unknown message type"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_cell_update() {
        let msg = decode(r#"{"type":"cell_update","row":2,"column":3,"value":"x","timestamp":1000}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::CellUpdate {
                row: 2,
                column: 3,
                value: json!("x"),
                timestamp: 1000,
            }
        );
    }

    #[test]
    fn test_decode_selection_and_comment() {
        let sel = decode(
            r#"{"type":"selection","start_row":1,"start_column":2,"end_row":5,"end_column":4}"#,
        )
        .unwrap();
        assert!(matches!(sel, ClientMessage::Selection { end_row: 5, .. }));

        let comment = decode(
            r#"{"type":"comment","row":0,"column":1,"text":"check this","timestamp":42}"#,
        )
        .unwrap();
        assert!(matches!(comment, ClientMessage::Comment { ref text, .. } if text == "check this"));
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let msg = decode(r#"{"type":"formula_recalc","cells":[1,2]}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
        assert!(msg.dispatch(1, "alice").is_none());
    }

    #[test]
    fn test_malformed_envelopes_are_protocol_errors() {
        for text in [
            "not json",
            r#"{"row":1}"#,
            r#"{"type":"cursor_move","row":1}"#,
            r#"{"type":"cell_update","row":"two","column":3,"value":1,"timestamp":1}"#,
            "[1,2,3]",
        ] {
            assert!(
                matches!(decode(text), Err(CollabError::Protocol(_))),
                "expected protocol error for {text}"
            );
        }
    }

    #[test]
    fn test_dispatch_stamps_server_identity() {
        // Client tries to impersonate user 99.
        let msg = decode(
            r#"{"type":"cursor_move","row":4,"column":5,"user_id":99,"username":"mallory"}"#,
        )
        .unwrap();
        let event = msg.dispatch(1, "alice").unwrap();
        assert_eq!(
            event,
            ServerMessage::CursorMove {
                user_id: 1,
                username: "alice".into(),
                row: 4,
                column: 5,
            }
        );
    }

    #[test]
    fn test_encode_wire_shape() {
        let text = encode(&ServerMessage::user_joined(3, "carol", 2)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "user_joined", "user_id": 3, "username": "carol", "active_users": 2})
        );

        let connected = ServerMessage::Connected {
            sheet_id: 7,
            active_users: vec![Presence { user_id: 3, username: "carol".into() }],
        };
        let value: Value = serde_json::from_str(&encode(&connected).unwrap()).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["active_users"][0]["username"], "carol");
    }

    #[test]
    fn test_cell_update_relayed_to_peer_not_sender() {
        use crate::ws::registry::RoomRegistry;
        use axum::extract::ws::Message;
        use tokio::sync::mpsc;

        let engine = BroadcastEngine::new(RoomRegistry::new());
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = ConnectionHandle::new(1, "alice", tx_a);
        let b = ConnectionHandle::new(2, "bob", tx_b);
        engine.registry().join(7, a.clone());
        engine.registry().join(7, b.clone());

        handle_text_message(
            r#"{"type":"cell_update","row":2,"column":3,"value":"x","timestamp":1000}"#,
            &a,
            7,
            &engine,
        );

        let Ok(Message::Text(text)) = rx_b.try_recv() else {
            panic!("bob should receive the update");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "cell_update",
                "user_id": 1,
                "username": "alice",
                "row": 2,
                "column": 3,
                "value": "x",
                "timestamp": 1000
            })
        );
        assert!(rx_b.try_recv().is_err());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_malformed_message_is_dropped_quietly() {
        use crate::ws::registry::RoomRegistry;
        use tokio::sync::mpsc;

        let engine = BroadcastEngine::new(RoomRegistry::new());
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = ConnectionHandle::new(1, "alice", tx_a);
        let b = ConnectionHandle::new(2, "bob", tx_b);
        engine.registry().join(7, a.clone());
        engine.registry().join(7, b.clone());

        handle_text_message("{oops", &a, 7, &engine);
        handle_text_message(r#"{"type":"zoom","level":3}"#, &a, 7, &engine);

        assert!(rx_b.try_recv().is_err());
        assert_eq!(engine.registry().member_count(7), 2);
    }

    #[test]
    fn test_user_left_carries_remaining_count() {
        let departure = Departure {
            room_id: 1,
            connection_id: uuid::Uuid::now_v7(),
            user_id: 2,
            username: "bob".into(),
            remaining: 4,
        };
        assert_eq!(
            ServerMessage::user_left(&departure),
            ServerMessage::UserLeft {
                user_id: 2,
                username: "bob".into(),
                active_users: 4,
            }
        );
    }
}
