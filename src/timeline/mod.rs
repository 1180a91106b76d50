//! Conversation timeline
//!
//! One chronologically ordered log of display messages, ordered by
//! `(timestamp, seq)`. `seq` is assigned at creation and strictly increases,
//! so messages sharing a timestamp keep creation order.

mod conversation;
mod dedup;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::Turn;

pub use conversation::{CompletionSignal, ConversationTimeline, NewMessage};
pub use dedup::CompletionDedup;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// String form used in logs and rendering
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered timeline entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
    pub is_streaming: bool,
}

impl DisplayMessage {
    /// Sort key giving a total order
    #[must_use]
    pub const fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.seq)
    }
}

/// In-place update of an existing message
///
/// Timestamp and seq are never patched, so a message keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_streaming: Option<bool>,
}

impl MessagePatch {
    /// Replace the content
    #[must_use]
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            is_streaming: None,
        }
    }

    /// Freeze a streaming message
    #[must_use]
    pub const fn finished() -> Self {
        Self {
            content: None,
            is_streaming: Some(false),
        }
    }

    fn apply(&self, message: &mut DisplayMessage) {
        if let Some(content) = &self.content {
            content.clone_into(&mut message.content);
        }
        if let Some(streaming) = self.is_streaming {
            message.is_streaming = streaming;
        }
    }
}

/// Rendering collaborator
///
/// Calls arrive after the timeline has committed the change, so a renderer
/// may read the timeline back without deadlocking.
pub trait Renderer: Send + Sync {
    /// A message was inserted at `position`
    fn add_message(&self, message: &DisplayMessage, position: usize);

    /// A message was patched in place
    fn update_message(&self, id: &str, patch: &MessagePatch);

    /// Status line (e.g. "Listening…"); `muted` dims it
    fn set_status(&self, text: &str, muted: bool);

    /// Everything was removed
    fn clear(&self);

    /// Timeline was replaced by persisted history
    fn load_from_history(&self, turns: &[Turn]);
}

/// Events published by the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    /// Message inserted
    MessageAdded {
        message: DisplayMessage,
        position: usize,
    },
    /// Message patched
    MessageUpdated { id: String, patch: MessagePatch },
    /// Streaming assistant message created
    StreamingStarted { id: String },
    /// Streaming assistant message frozen
    StreamingFinalized { id: String, content: String },
    /// Timeline cleared
    Cleared,
    /// Timeline replaced from history
    HistoryLoaded { messages: usize },
}

impl TimelineEvent {
    /// Bus topic
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::MessageAdded { .. } => "timeline:message_added",
            Self::MessageUpdated { .. } => "timeline:message_updated",
            Self::StreamingStarted { .. } => "timeline:streaming_started",
            Self::StreamingFinalized { .. } => "timeline:streaming_finalized",
            Self::Cleared => "timeline:cleared",
            Self::HistoryLoaded { .. } => "timeline:history_loaded",
        }
    }
}
