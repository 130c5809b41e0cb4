pub mod migrations;
pub mod models;
pub mod store;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::ws::{RoomId, UserId};
use models::{RoomRecord, UserRecord};

/// Type alias for the shared database connection.
/// rusqlite is synchronous, so we wrap in Arc<Mutex> for thread safety
/// with tokio::task::spawn_blocking for DB operations.
pub type DbPool = Arc<Mutex<Connection>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("DB lock poisoned")]
    Lock,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Looks up users by id.
pub trait UserDirectory: Send + Sync {
    fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;
}

/// Looks up the sheets that collaboration rooms are bound to.
pub trait ResourceStore: Send + Sync {
    fn find_room(&self, room_id: RoomId) -> Result<Option<RoomRecord>, StoreError>;

    /// The room, if it exists and belongs to `user_id`.
    fn find_room_owned_by(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomRecord>, StoreError> {
        Ok(self
            .find_room(room_id)?
            .filter(|room| room.owner_id == user_id))
    }
}

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("collab.db");
    let mut conn = Connection::open(&db_path)?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}
