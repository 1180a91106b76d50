//! Single-read session bootstrap

use std::sync::Arc;

use super::SessionEvent;
use super::realtime::{RealtimeItem, map_history_to_items};
use crate::conversation::{ConversationStore, Turn};
use crate::events::EventBus;
use crate::timeline::ConversationTimeline;
use crate::transport::{AgentInfo, ConnectContext, ConnectRequest, Transport, TransportConnector};
use crate::{Error, Result};

/// Default number of turns handed to the realtime model
pub const DEFAULT_MAX_TURNS: usize = 8;

/// Options for [`SessionBootstrap::bootstrap_session`]
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapOptions {
    /// Resume this conversation instead of the current one
    pub conversation_id: Option<String>,
    /// Turns kept for the realtime context
    pub max_turns: usize,
    /// Extra instructions for the model
    pub instructions: Option<String>,
    /// Opaque metadata passed through to the transport
    pub metadata: serde_json::Value,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            conversation_id: None,
            max_turns: DEFAULT_MAX_TURNS,
            instructions: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// The one result of a bootstrap's history read
///
/// Both the full history and the realtime subset are views over `turns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySnapshot {
    conversation_id: String,
    turns: Vec<Turn>,
}

impl HistorySnapshot {
    /// Wrap a history read, ordering it chronologically
    #[must_use]
    pub fn new(conversation_id: String, mut turns: Vec<Turn>) -> Self {
        turns.sort_by_key(|t| t.timestamp);
        Self {
            conversation_id,
            turns,
        }
    }

    /// Conversation the history belongs to
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Full history for the UI
    #[must_use]
    pub fn full_history(&self) -> &[Turn] {
        &self.turns
    }

    /// Most recent `max_turns` turns for the realtime context
    #[must_use]
    pub fn trimmed_for_realtime(&self, max_turns: usize) -> &[Turn] {
        trim_for_realtime(&self.turns, max_turns)
    }

    /// Take ownership of the turns
    #[must_use]
    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

/// Keep the last `max_turns` turns without copying
#[must_use]
pub fn trim_for_realtime(history: &[Turn], max_turns: usize) -> &[Turn] {
    &history[history.len().saturating_sub(max_turns)..]
}

/// Result of a bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapResult {
    /// Full chronological history, the same data the realtime items came from
    pub history: Vec<Turn>,
    pub hydrated_item_count: usize,
    pub conversation_id: String,
    pub session: Arc<dyn Transport>,
    pub agent: AgentInfo,
}

/// Connect-time hydration from a single history read
pub struct SessionBootstrap {
    store: Arc<dyn ConversationStore>,
    connector: Arc<dyn TransportConnector>,
    timeline: Option<Arc<ConversationTimeline>>,
    bus: Option<Arc<EventBus>>,
}

impl std::fmt::Debug for SessionBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBootstrap")
            .field("timeline", &self.timeline.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionBootstrap {
    /// Create a bootstrap over a store and a transport connector
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            store,
            connector,
            timeline: None,
            bus: None,
        }
    }

    /// Seed this timeline from the same history read
    #[must_use]
    pub fn with_timeline(mut self, timeline: Arc<ConversationTimeline>) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// Publish [`SessionEvent::Bootstrapped`] on a shared bus
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Resolve the conversation, read its history once, and connect
    ///
    /// The timeline and the realtime items are both derived from the one
    /// [`HistorySnapshot`]. The timeline is seeded before connecting so the
    /// UI shows history even while the transport handshake is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConversation`] for an explicit id the store does
    /// not know, or the store/connector error
    pub async fn bootstrap_session(&self, options: BootstrapOptions) -> Result<BootstrapResult> {
        let conversation_id = self.resolve_conversation(options.conversation_id.as_deref()).await?;

        let snapshot = HistorySnapshot::new(
            conversation_id.clone(),
            self.store.get_conversation_history(&conversation_id).await?,
        );

        let trimmed = snapshot.trimmed_for_realtime(options.max_turns);
        let history_items: Vec<RealtimeItem> = map_history_to_items(trimmed);
        let hydrated_item_count = history_items.len();

        tracing::debug!(
            conversation_id = %conversation_id,
            history_turns = snapshot.full_history().len(),
            trimmed_turns = trimmed.len(),
            hydrated_items = hydrated_item_count,
            "history snapshot loaded"
        );

        if let Some(timeline) = &self.timeline {
            timeline.set_conversation_id(conversation_id.clone());
            timeline.load_from_history(snapshot.full_history());
        }

        let connected = self
            .connector
            .connect_with_history(ConnectRequest {
                history_items,
                context: ConnectContext {
                    conversation_id: conversation_id.clone(),
                    instructions: options.instructions,
                    metadata: options.metadata,
                },
            })
            .await?;

        let history = snapshot.into_turns();
        tracing::info!(
            conversation_id = %conversation_id,
            agent = %connected.agent.name,
            history_turns = history.len(),
            hydrated_items = hydrated_item_count,
            "session bootstrapped"
        );

        if let Some(bus) = &self.bus {
            bus.emit(SessionEvent::Bootstrapped {
                conversation_id: conversation_id.clone(),
                history_turns: history.len(),
                hydrated_items: hydrated_item_count,
                agent: connected.agent.name.clone(),
            });
        }

        Ok(BootstrapResult {
            history,
            hydrated_item_count,
            conversation_id,
            session: connected.session,
            agent: connected.agent,
        })
    }

    async fn resolve_conversation(&self, requested: Option<&str>) -> Result<String> {
        let Some(requested) = requested else {
            return self.store.current_conversation_id().await;
        };

        let requested = requested.trim();
        if requested.is_empty() || !self.store.conversation_exists(requested).await? {
            return Err(Error::UnknownConversation(requested.to_string()));
        }
        Ok(requested.to_string())
    }
}
