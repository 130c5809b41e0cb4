//! SQLite-backed user directory and sheet store.

use chrono::Utc;
use rusqlite::OptionalExtension;

use super::models::{RoomRecord, UserRecord};
use super::{DbPool, ResourceStore, StoreError, UserDirectory};
use crate::ws::{RoomId, UserId};

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Lock)
    }

    pub fn create_user(&self, username: &str, email: &str) -> Result<UserId, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (username, email, is_active, created_at) VALUES (?1, ?2, 1, ?3)",
            rusqlite::params![username, email, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_user_active(&self, user_id: UserId, active: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            rusqlite::params![active, user_id],
        )?;
        Ok(())
    }

    pub fn create_dataset(&self, name: &str, owner_id: UserId) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO datasets (name, owner_id, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, owner_id, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_sheet(
        &self,
        name: &str,
        dataset_id: i64,
        owner_id: UserId,
    ) -> Result<RoomId, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sheets (name, dataset_id, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, dataset_id, owner_id, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl UserDirectory for SqliteStore {
    fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, username, is_active FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        is_active: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}

impl ResourceStore for SqliteStore {
    fn find_room(&self, room_id: RoomId) -> Result<Option<RoomRecord>, StoreError> {
        let conn = self.conn()?;
        let sheet = conn
            .query_row(
                "SELECT id, name, dataset_id, owner_id FROM sheets WHERE id = ?1",
                [room_id],
                |row| {
                    Ok(RoomRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        dataset_id: row.get(2)?,
                        owner_id: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(sheet)
    }
}
