use axum::extract::ws::Message;
use std::collections::VecDeque;

use super::protocol::{self, ServerMessage};
use super::registry::{Departure, JoinOutcome, RoomRegistry};
use super::{ConnectionHandle, ConnectionId, RoomId, SendOutcome};

/// Delivers room events to member connections.
///
/// Each pass works on a snapshot of the room, so no registry lock is held
/// while frames are queued. Members whose queue rejects a frame are reaped:
/// removed from the registry, told to close, and announced with `user_left`
/// once the current pass has finished.
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    registry: RoomRegistry,
}

impl BroadcastEngine {
    pub fn new(registry: RoomRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Join `conn` to `room_id` and announce `user_joined` to the other
    /// members. If the connection was moved out of another room, that room
    /// gets `user_left` first.
    pub fn join(&self, room_id: RoomId, conn: &ConnectionHandle) -> JoinOutcome {
        let outcome = self.registry.join(room_id, conn.clone());
        if let Some(departure) = outcome.moved_from.clone() {
            self.announce_departures(VecDeque::from([departure]));
        }
        self.fanout(
            room_id,
            &ServerMessage::user_joined(conn.user_id, &conn.username, outcome.member_count),
            Some(conn.id),
        );
        outcome
    }

    /// Send `message` to every member of `room_id` except `exclude`.
    /// Returns how many members the message was queued for.
    pub fn fanout(
        &self,
        room_id: RoomId,
        message: &ServerMessage,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut departures = VecDeque::new();
        let delivered = self.deliver(room_id, message, exclude, &mut departures);
        self.announce_departures(departures);
        delivered
    }

    /// Send `message` to a single connection. A failed send reaps it.
    pub fn send_to(&self, conn: &ConnectionHandle, message: &ServerMessage) -> bool {
        let Some(frame) = encode_frame(message) else {
            return false;
        };
        let outcome = conn.try_send(frame);
        if outcome.is_delivered() {
            return true;
        }

        tracing::warn!(
            conn_id = %conn.id,
            user_id = conn.user_id,
            kind = message.kind(),
            ?outcome,
            "Direct send failed"
        );
        let departures = self.reap(conn).into_iter().collect();
        self.announce_departures(departures);
        false
    }

    /// Broadcast `user_left` for each departure. Reaping during these passes
    /// appends to the same queue instead of recursing.
    fn announce_departures(&self, mut departures: VecDeque<Departure>) {
        while let Some(departure) = departures.pop_front() {
            let notice = ServerMessage::user_left(&departure);
            self.deliver(departure.room_id, &notice, None, &mut departures);
        }
    }

    /// One delivery pass over a snapshot of the room.
    fn deliver(
        &self,
        room_id: RoomId,
        message: &ServerMessage,
        exclude: Option<ConnectionId>,
        departures: &mut VecDeque<Departure>,
    ) -> usize {
        let Some(frame) = encode_frame(message) else {
            return 0;
        };

        let members = self.registry.snapshot(room_id);
        let mut delivered = 0;

        for member in members.iter().filter(|m| Some(m.id) != exclude) {
            // Skip members removed since the snapshot was taken.
            if self.registry.room_of(member.id) != Some(room_id) {
                continue;
            }

            match member.try_send(frame.clone()) {
                SendOutcome::Delivered => delivered += 1,
                outcome => {
                    tracing::warn!(
                        sheet_id = room_id,
                        conn_id = %member.id,
                        user_id = member.user_id,
                        ?outcome,
                        "Send failed, dropping connection"
                    );
                    departures.extend(self.reap(member));
                }
            }
        }

        tracing::debug!(
            sheet_id = room_id,
            kind = message.kind(),
            recipients = members.len(),
            delivered,
            "Broadcast pass complete"
        );
        delivered
    }

    fn reap(&self, member: &ConnectionHandle) -> Option<Departure> {
        member.close();
        self.registry.leave(member.id)
    }
}

fn encode_frame(message: &ServerMessage) -> Option<Message> {
    match protocol::encode(message) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(kind = message.kind(), error = %e, "Failed to encode message");
            None
        }
    }
}
