//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Conversations table
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            title TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Turns table; timestamps are fixed-width RFC 3339 so text order is time order
        CREATE TABLE IF NOT EXISTS turns (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            timestamp TEXT NOT NULL,
            user_transcript TEXT,
            assistant_response TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, timestamp);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated database to v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Most recently active conversation lookup
        CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at);

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated database to v2");
    Ok(())
}
