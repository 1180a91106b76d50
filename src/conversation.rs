//! Conversation turns and the persistence seam

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// One persisted exchange fragment
///
/// A logical exchange may be stored as two turns (user half, then assistant
/// half) or as one turn carrying both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_response: Option<String>,
    pub conversation_id: String,
}

impl Turn {
    /// User half of an exchange
    #[must_use]
    pub fn user(conversation_id: &str, text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            user_transcript: Some(text.to_string()),
            assistant_response: None,
            conversation_id: conversation_id.to_string(),
        }
    }

    /// Assistant half of an exchange
    #[must_use]
    pub fn assistant(conversation_id: &str, text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            user_transcript: None,
            assistant_response: Some(text.to_string()),
            conversation_id: conversation_id.to_string(),
        }
    }

    /// User transcript, if it has visible content
    #[must_use]
    pub fn user_text(&self) -> Option<&str> {
        non_blank(self.user_transcript.as_deref())
    }

    /// Assistant response, if it has visible content
    #[must_use]
    pub fn assistant_text(&self) -> Option<&str> {
        non_blank(self.assistant_response.as_deref())
    }

    /// Neither half has visible content
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.user_text().is_none() && self.assistant_text().is_none()
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

/// Persistence collaborator for conversation turns
///
/// Implementations return history in chronological order.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Id of the conversation the client should resume, created on demand
    async fn current_conversation_id(&self) -> Result<String>;

    /// Whether a conversation id is known
    async fn conversation_exists(&self, conversation_id: &str) -> Result<bool>;

    /// Persist one turn
    async fn add_conversation_turn(&self, turn: &Turn) -> Result<()>;

    /// Every turn of a conversation, oldest first
    async fn get_conversation_history(&self, conversation_id: &str) -> Result<Vec<Turn>>;
}
