//! Conversation storage
//!
//! `SQLite` behind an r2d2 pool. Every pooled connection enforces foreign
//! keys so deleting a conversation removes its turns.

mod schema;
pub mod turn;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

pub use schema::SCHEMA_VERSION;
pub use turn::{ConversationSummary, TurnRepo};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Connections for the on-disk database
const FILE_POOL_SIZE: u32 = 4;

/// Open (creating if needed) the conversation database at `path`
///
/// # Errors
///
/// Returns error if the directory cannot be created or migrations fail
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = open(SqliteConnectionManager::file(path), FILE_POOL_SIZE)?;
    tracing::info!(path = %path.display(), version = SCHEMA_VERSION, "conversation store ready");
    Ok(pool)
}

/// In-memory database for tests and ephemeral sessions
///
/// Each in-memory connection is a separate database, so the pool holds one.
///
/// # Errors
///
/// Returns error if migrations fail
pub fn init_memory() -> Result<DbPool> {
    open(SqliteConnectionManager::memory(), 1)
}

fn open(manager: SqliteConnectionManager, max_size: u32) -> Result<DbPool> {
    let manager = manager.with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_database_is_migrated() {
        let pool = init_memory().unwrap();
        let conn = pool.get().unwrap();
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let foreign_keys: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn migrations_are_rerunnable() {
        let pool = init_memory().unwrap();
        let conn = pool.get().unwrap();
        schema::init(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('conversations', 'turns')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
