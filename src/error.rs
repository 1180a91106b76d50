//! Error types for the interaction core

use thiserror::Error;

/// Result type alias for interaction operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the interaction core
#[derive(Debug, Error)]
pub enum Error {
    /// Text input was empty or whitespace only
    #[error("message is empty")]
    EmptyMessage,

    /// Conversation id could not be resolved
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    /// Timeline message does not exist
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Microphone acquisition failed (permission denied, no device)
    #[error("microphone unavailable: {0}")]
    Microphone(String),

    /// No transport attached and auto-connect disabled
    #[error("transport unavailable")]
    TransportUnavailable,

    /// Transport rejected a send
    #[error("transport error: {0}")]
    Transport(String),

    /// Connecting a transport failed
    #[error("connect error: {0}")]
    Connect(String),

    /// Controller was disposed
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether a failed text send is worth another attempt
    ///
    /// Connect and transport failures are transient; validation and
    /// lifecycle errors are not.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Transport(_) | Self::Io(_))
    }
}
