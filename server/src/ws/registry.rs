//! In-memory room table.
//!
//! Maps sheet id -> member connections, plus a reverse index from connection
//! to the room it joined. A room exists only while it has at least one member:
//! the first `join` creates it and the `leave` that empties it removes it,
//! both under the room's shard lock so concurrent joins and leaves on the same
//! room never lose updates.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::{ConnectionHandle, ConnectionId, RoomId, UserId};

/// One user present in a room. Derived from the live connections, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: UserId,
    pub username: String,
}

/// State of the room right after a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Distinct users present, including the one who just joined.
    pub presence: Vec<Presence>,
    /// Number of member connections, including the new one.
    pub member_count: usize,
    /// Set when the connection was moved here from another room. The caller
    /// announces it to that room.
    pub moved_from: Option<Departure>,
}

/// Record of a connection that has just been removed from its room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: RoomId,
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    /// Member connections left in the room after the removal.
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct Room {
    /// Join order is preserved so presence lists are stable.
    members: Vec<ConnectionHandle>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<RoomId, Room>>,
    memberships: Arc<DashMap<ConnectionId, RoomId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room if this is its first member.
    ///
    /// A connection belongs to at most one room: if it is already joined
    /// somewhere it is removed from that room first and the resulting
    /// departure is returned in `JoinOutcome::moved_from`.
    pub fn join(&self, room_id: RoomId, conn: ConnectionHandle) -> JoinOutcome {
        let moved_from = self.leave(conn.id);
        if let Some(departure) = &moved_from {
            tracing::debug!(
                conn_id = %conn.id,
                from_sheet = departure.room_id,
                to_sheet = room_id,
                "Connection moved between rooms"
            );
        }

        let conn_id = conn.id;
        let mut room = self.rooms.entry(room_id).or_default();
        room.members.push(conn);
        // Recorded while the room shard is still locked, so a concurrent
        // leave for this connection cannot miss the membership.
        self.memberships.insert(conn_id, room_id);

        let outcome = JoinOutcome {
            presence: presence_of(&room.members),
            member_count: room.members.len(),
            moved_from,
        };
        drop(room);

        tracing::debug!(
            sheet_id = room_id,
            conn_id = %conn_id,
            members = outcome.member_count,
            "Connection joined room"
        );
        outcome
    }

    /// Remove a connection from whatever room it is in.
    ///
    /// Idempotent: returns `None` when the connection is not (or no longer)
    /// joined. A stale mapping to a room that has already been deleted is
    /// discarded without recreating the room.
    pub fn leave(&self, conn_id: ConnectionId) -> Option<Departure> {
        let (_, room_id) = self.memberships.remove(&conn_id)?;

        let departure = match self.rooms.entry(room_id) {
            Entry::Occupied(mut occupied) => {
                let room = occupied.get_mut();
                let position = room.members.iter().position(|m| m.id == conn_id)?;
                let member = room.members.remove(position);
                let remaining = room.members.len();
                if remaining == 0 {
                    occupied.remove();
                }
                Departure {
                    room_id,
                    connection_id: conn_id,
                    user_id: member.user_id,
                    username: member.username,
                    remaining,
                }
            }
            Entry::Vacant(_) => {
                tracing::debug!(
                    sheet_id = room_id,
                    conn_id = %conn_id,
                    "Discarding stale membership for deleted room"
                );
                return None;
            }
        };

        tracing::debug!(
            sheet_id = room_id,
            conn_id = %conn_id,
            remaining = departure.remaining,
            "Connection left room"
        );
        Some(departure)
    }

    /// Distinct users currently present in a room, in join order.
    pub fn members_of(&self, room_id: RoomId) -> Vec<Presence> {
        self.rooms
            .get(&room_id)
            .map(|room| presence_of(&room.members))
            .unwrap_or_default()
    }

    /// Point-in-time copy of a room's member connections.
    /// Callers iterate the copy, never the live set.
    pub fn snapshot(&self, room_id: RoomId) -> Vec<ConnectionHandle> {
        self.rooms
            .get(&room_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    /// Room a connection is currently joined to.
    pub fn room_of(&self, conn_id: ConnectionId) -> Option<RoomId> {
        self.memberships.get(&conn_id).map(|entry| *entry.value())
    }

    pub fn member_count(&self, room_id: RoomId) -> usize {
        self.rooms
            .get(&room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    pub fn contains_room(&self, room_id: RoomId) -> bool {
        self.rooms.contains_key(&room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

/// One presence entry per user, even when a user holds several connections.
fn presence_of(members: &[ConnectionHandle]) -> Vec<Presence> {
    let mut seen = HashSet::new();
    members
        .iter()
        .filter(|m| seen.insert(m.user_id))
        .map(|m| Presence {
            user_id: m.user_id,
            username: m.username.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(user_id: UserId, name: &str) -> ConnectionHandle {
        let (tx, _rx) = mpsc::channel(8);
        ConnectionHandle::new(user_id, name, tx)
    }

    #[test]
    fn test_first_join_creates_room() {
        let registry = RoomRegistry::new();
        assert!(!registry.contains_room(7));

        let outcome = registry.join(7, handle(1, "alice"));

        assert!(registry.contains_room(7));
        assert_eq!(outcome.member_count, 1);
        assert_eq!(
            outcome.presence,
            vec![Presence { user_id: 1, username: "alice".into() }]
        );
    }

    #[test]
    fn test_last_leave_deletes_room() {
        let registry = RoomRegistry::new();
        let a = handle(1, "alice");
        let b = handle(2, "bob");
        registry.join(9, a.clone());
        registry.join(9, b.clone());

        let first = registry.leave(a.id).expect("alice was joined");
        assert_eq!(first.remaining, 1);
        assert!(registry.contains_room(9));

        let second = registry.leave(b.id).expect("bob was joined");
        assert_eq!(second.remaining, 0);
        assert!(!registry.contains_room(9));
        assert!(registry.members_of(9).is_empty());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_double_leave_is_noop() {
        let registry = RoomRegistry::new();
        let a = handle(1, "alice");
        let b = handle(2, "bob");
        registry.join(3, a.clone());
        registry.join(3, b.clone());

        assert!(registry.leave(a.id).is_some());
        assert!(registry.leave(a.id).is_none());

        assert_eq!(registry.member_count(3), 1);
        assert_eq!(registry.room_of(b.id), Some(3));
    }

    #[test]
    fn test_leave_unknown_connection_does_not_create_room() {
        let registry = RoomRegistry::new();
        assert!(registry.leave(uuid::Uuid::now_v7()).is_none());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_stale_membership_does_not_recreate_room() {
        let registry = RoomRegistry::new();
        let a = handle(1, "alice");
        registry.join(4, a.clone());
        // Simulate the room disappearing while the reverse index still points at it.
        registry.rooms.remove(&4);

        assert!(registry.leave(a.id).is_none());
        assert!(!registry.contains_room(4));
        assert!(registry.room_of(a.id).is_none());
    }

    #[test]
    fn test_same_user_multiple_connections() {
        let registry = RoomRegistry::new();
        let tab1 = handle(1, "alice");
        let tab2 = handle(1, "alice");
        registry.join(5, tab1.clone());
        let outcome = registry.join(5, tab2.clone());

        assert_eq!(outcome.member_count, 2);
        assert_eq!(outcome.presence.len(), 1);

        registry.leave(tab1.id);
        assert_eq!(registry.members_of(5).len(), 1);
        assert!(registry.contains_room(5));
    }

    #[test]
    fn test_join_moves_connection_between_rooms() {
        let registry = RoomRegistry::new();
        let a = handle(1, "alice");
        assert!(registry.join(1, a.clone()).moved_from.is_none());
        let outcome = registry.join(2, a.clone());

        let departure = outcome.moved_from.expect("move should report the old room");
        assert_eq!(departure.room_id, 1);
        assert_eq!(departure.remaining, 0);
        assert!(!registry.contains_room(1));
        assert_eq!(registry.room_of(a.id), Some(2));
        assert_eq!(registry.member_count(2), 1);
    }

    #[test]
    fn test_snapshot_is_detached_from_live_set() {
        let registry = RoomRegistry::new();
        let a = handle(1, "alice");
        let b = handle(2, "bob");
        registry.join(6, a.clone());
        registry.join(6, b.clone());

        let snapshot = registry.snapshot(6);
        registry.leave(b.id);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.snapshot(6).len(), 1);
    }

    #[test]
    fn test_room_present_iff_members_across_sequence() {
        let registry = RoomRegistry::new();
        let conns: Vec<_> = (0..6).map(|i| handle(i, "u")).collect();
        for (i, c) in conns.iter().enumerate() {
            registry.join((i % 2) as RoomId, c.clone());
        }
        for c in &conns {
            registry.leave(c.id);
            for room in 0..2 {
                assert_eq!(registry.contains_room(room), registry.member_count(room) > 0);
            }
        }
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_leave_leaves_no_empty_rooms() {
        let registry = RoomRegistry::new();
        let mut tasks = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let conn = handle(i, "user");
                registry.join(i % 4, conn.clone());
                tokio::task::yield_now().await;
                registry.leave(conn.id);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.room_count(), 0);
    }
}
