//! Conversation turn repository

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::{DbConn, DbPool};
use crate::conversation::{ConversationStore, Turn};
use crate::{Error, Result};

/// A stored conversation with its turn count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: Option<String>,
    pub turn_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Turn repository
#[derive(Clone)]
pub struct TurnRepo {
    pool: DbPool,
}

impl std::fmt::Debug for TurnRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnRepo")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl TurnRepo {
    /// Create a new turn repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Create a new conversation
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create_conversation(&self, title: Option<&str>) -> Result<String> {
        let conn = self.conn()?;
        let id = Uuid::new_v4().to_string();
        let now = format_datetime(Utc::now());

        conn.execute(
            "INSERT INTO conversations (id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![id, title, now],
        )?;

        tracing::debug!(conversation_id = %id, "conversation created");
        Ok(id)
    }

    /// Most recently active conversation, created if none exists
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn current_conversation(&self) -> Result<String> {
        let existing: Option<String> = self
            .conn()?
            .query_row(
                "SELECT id FROM conversations ORDER BY updated_at DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => Ok(id),
            None => self.create_conversation(None),
        }
    }

    /// Whether a conversation exists
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn exists(&self, conversation_id: &str) -> Result<bool> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM conversations WHERE id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Store a turn and mark its conversation active
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConversation`] if the conversation does not
    /// exist, or error if database operation fails
    pub fn add(&self, turn: &Turn) -> Result<()> {
        if !self.exists(&turn.conversation_id)? {
            return Err(Error::UnknownConversation(turn.conversation_id.clone()));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO turns (id, conversation_id, timestamp, user_transcript, assistant_response)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                turn.id,
                turn.conversation_id,
                format_datetime(turn.timestamp),
                turn.user_transcript,
                turn.assistant_response,
            ],
        )?;
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![format_datetime(Utc::now()), turn.conversation_id],
        )?;

        tracing::trace!(turn_id = %turn.id, conversation_id = %turn.conversation_id, "turn stored");
        Ok(())
    }

    /// Every turn of a conversation, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn history(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, user_transcript, assistant_response, conversation_id
             FROM turns WHERE conversation_id = ?1
             ORDER BY timestamp ASC, rowid ASC",
        )?;

        let turns = stmt
            .query_map([conversation_id], |row| {
                Ok(Turn {
                    id: row.get(0)?,
                    timestamp: parse_datetime(&row.get::<_, String>(1)?),
                    user_transcript: row.get(2)?,
                    assistant_response: row.get(3)?,
                    conversation_id: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(turns)
    }

    /// Conversations, most recently active first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.title, c.updated_at, COUNT(t.id)
             FROM conversations c LEFT JOIN turns t ON t.conversation_id = c.id
             GROUP BY c.id
             ORDER BY c.updated_at DESC, c.rowid DESC",
        )?;

        let conversations = stmt
            .query_map([], |row| {
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    updated_at: parse_datetime(&row.get::<_, String>(2)?),
                    turn_count: usize::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(conversations)
    }
}

#[async_trait]
impl ConversationStore for TurnRepo {
    async fn current_conversation_id(&self) -> Result<String> {
        self.current_conversation()
    }

    async fn conversation_exists(&self, conversation_id: &str) -> Result<bool> {
        self.exists(conversation_id)
    }

    async fn add_conversation_turn(&self, turn: &Turn) -> Result<()> {
        self.add(turn)
    }

    async fn get_conversation_history(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        self.history(conversation_id)
    }
}

/// Fixed-width RFC 3339 so lexical order matches chronological order
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::init_memory;

    fn setup() -> TurnRepo {
        TurnRepo::new(init_memory().unwrap())
    }

    #[test]
    fn current_conversation_is_created_once() {
        let repo = setup();
        let first = repo.current_conversation().unwrap();
        let second = repo.current_conversation().unwrap();
        assert_eq!(first, second);
        assert!(repo.exists(&first).unwrap());
        assert!(!repo.exists("nope").unwrap());
    }

    #[test]
    fn history_is_chronological_regardless_of_insert_order() {
        let repo = setup();
        let conv = repo.current_conversation().unwrap();
        let start = Utc::now();

        repo.add(&Turn::assistant(&conv, "second", start + Duration::seconds(2)))
            .unwrap();
        repo.add(&Turn::user(&conv, "first", start)).unwrap();

        let history = repo.history(&conv).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].user_transcript.as_deref(), Some("first"));
        assert_eq!(history[0].timestamp, start);
        assert_eq!(history[1].assistant_response.as_deref(), Some("second"));
    }

    #[test]
    fn turn_for_unknown_conversation_is_rejected() {
        let repo = setup();
        let err = repo.add(&Turn::user("ghost", "hi", Utc::now())).unwrap_err();
        assert!(matches!(err, Error::UnknownConversation(_)));
    }

    #[test]
    fn most_recently_active_conversation_is_current() {
        let repo = setup();
        let older = repo.create_conversation(Some("older")).unwrap();
        let newer = repo.create_conversation(Some("newer")).unwrap();
        assert_eq!(repo.current_conversation().unwrap(), newer);

        repo.add(&Turn::user(&older, "back again", Utc::now())).unwrap();
        assert_eq!(repo.current_conversation().unwrap(), older);

        let listed = repo.list_conversations().unwrap();
        assert_eq!(listed[0].id, older);
        assert_eq!(listed[0].turn_count, 1);
        assert_eq!(listed[1].turn_count, 0);
    }

    #[tokio::test]
    async fn store_trait_round_trips_turns() {
        let repo = setup();
        let store: &dyn ConversationStore = &repo;
        let conv = store.current_conversation_id().await.unwrap();

        store
            .add_conversation_turn(&Turn::user(&conv, "hello", Utc::now()))
            .await
            .unwrap();

        let history = store.get_conversation_history(&conv).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_text(), Some("hello"));
    }
}
