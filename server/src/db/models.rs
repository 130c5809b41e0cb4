//! Row types the collaboration layer reads from the store.

use crate::ws::{RoomId, UserId};

/// Identity as seen by the session gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub is_active: bool,
}

/// A sheet, which is the resource a collaboration room is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    pub dataset_id: i64,
    pub owner_id: UserId,
}
