//! Session hydration
//!
//! One history read per bootstrap, shared by the timeline and the realtime
//! model context.

mod bootstrap;
mod realtime;

use serde::Serialize;

pub use bootstrap::{
    BootstrapOptions, BootstrapResult, DEFAULT_MAX_TURNS, HistorySnapshot, SessionBootstrap,
    trim_for_realtime,
};
pub use realtime::{RealtimeContent, RealtimeItem, map_history_to_items};

/// Events published by the session bootstrap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A session connected with hydrated history
    Bootstrapped {
        conversation_id: String,
        history_turns: usize,
        hydrated_items: usize,
        agent: String,
    },
}

impl SessionEvent {
    /// Bus topic
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Bootstrapped { .. } => "session:bootstrapped",
        }
    }
}
