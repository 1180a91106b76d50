//! Ordered conversation timeline with streaming updates

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::dedup::CompletionDedup;
use super::{DisplayMessage, MessagePatch, Renderer, Role, TimelineEvent};
use crate::conversation::{ConversationStore, Turn};
use crate::events::{EventBus, ListenerId, Listeners};
use crate::{Error, Result, lock};

/// Placeholder shown while the user's speech is being recognized
pub const LISTENING_PLACEHOLDER: &str = "Listening…";

/// Input to [`ConversationTimeline::add_message`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Defaults to a fresh uuid
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
    /// Defaults to now
    pub timestamp: Option<DateTime<Utc>>,
    pub is_streaming: bool,
}

impl NewMessage {
    /// A finished message created now
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            timestamp: None,
            is_streaming: false,
        }
    }

    /// Use an explicit id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Use an explicit timestamp
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A signal implying the current assistant response is complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSignal {
    /// Recognition or playback of the response stopped
    StreamingStopped,
    /// The realtime session was replaced or updated
    SessionChanged,
    /// The transport reported a response as done
    ResponseDone(String),
}

#[derive(Debug, Default)]
struct TimelineInner {
    messages: Vec<DisplayMessage>,
    next_seq: u64,
    streaming_id: Option<String>,
    pending_user_id: Option<String>,
    conversation_id: Option<String>,
}

impl TimelineInner {
    /// Insert keeping `(timestamp, seq)` order; returns the position
    fn insert(&mut self, new: NewMessage) -> (DisplayMessage, usize) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let message = DisplayMessage {
            id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role: new.role,
            content: new.content,
            timestamp: new.timestamp.unwrap_or_else(Utc::now),
            seq,
            is_streaming: new.is_streaming,
        };

        let key = message.order_key();
        let position = self.messages.partition_point(|m| m.order_key() < key);
        self.messages.insert(position, message.clone());
        (message, position)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut DisplayMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

/// Chronologically ordered store of display messages
///
/// Streaming updates mutate a single message in place. Finalization persists
/// the assistant turn through the [`ConversationStore`] and is idempotent.
pub struct ConversationTimeline {
    inner: Mutex<TimelineInner>,
    dedup: Mutex<CompletionDedup>,
    store: Option<Arc<dyn ConversationStore>>,
    renderer: Option<Arc<dyn Renderer>>,
    listeners: Listeners<TimelineEvent>,
    bus: Option<Arc<EventBus>>,
}

impl Default for ConversationTimeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConversationTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("ConversationTimeline")
            .field("messages", &inner.messages.len())
            .field("streaming_id", &inner.streaming_id)
            .field("conversation_id", &inner.conversation_id)
            .finish_non_exhaustive()
    }
}

impl ConversationTimeline {
    /// Create an empty timeline without persistence or rendering
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TimelineInner::default()),
            dedup: Mutex::new(CompletionDedup::default()),
            store: None,
            renderer: None,
            listeners: Listeners::new(),
            bus: None,
        }
    }

    /// Persist finalized turns to `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Mirror mutations into `renderer`
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Also publish events on a shared bus
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Conversation that persisted turns belong to
    pub fn set_conversation_id(&self, conversation_id: impl Into<String>) {
        lock(&self.inner).conversation_id = Some(conversation_id.into());
    }

    /// Current conversation id, if resolved
    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        lock(&self.inner).conversation_id.clone()
    }

    /// Insert a message at its chronological position
    pub fn add_message(&self, new: NewMessage) -> DisplayMessage {
        let (message, position) = lock(&self.inner).insert(new);
        tracing::trace!(id = %message.id, role = %message.role, position, "message added");
        self.announce_added(&message, position);
        message
    }

    fn announce_added(&self, message: &DisplayMessage, position: usize) {
        if let Some(renderer) = &self.renderer {
            renderer.add_message(message, position);
        }
        self.emit(TimelineEvent::MessageAdded {
            message: message.clone(),
            position,
        });
    }

    /// Patch a message in place, preserving its timestamp and position
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageNotFound`] if no message has `id`
    pub fn update_message(&self, id: &str, patch: MessagePatch) -> Result<DisplayMessage> {
        let updated = {
            let mut inner = lock(&self.inner);
            let message = inner
                .find_mut(id)
                .ok_or_else(|| Error::MessageNotFound(id.to_string()))?;
            patch.apply(message);
            message.clone()
        };

        if let Some(renderer) = &self.renderer {
            renderer.update_message(id, &patch);
        }
        self.emit(TimelineEvent::MessageUpdated {
            id: id.to_string(),
            patch,
        });
        Ok(updated)
    }

    /// Every message in display order
    #[must_use]
    pub fn messages(&self) -> Vec<DisplayMessage> {
        lock(&self.inner).messages.clone()
    }

    /// Look up one message
    #[must_use]
    pub fn get(&self, id: &str) -> Option<DisplayMessage> {
        lock(&self.inner).messages.iter().find(|m| m.id == id).cloned()
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).messages.len()
    }

    /// Whether the timeline is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an assistant message is streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        lock(&self.inner).streaming_id.is_some()
    }

    /// Forward a status line to the renderer
    pub fn set_status(&self, text: &str, muted: bool) {
        if let Some(renderer) = &self.renderer {
            renderer.set_status(text, muted);
        }
    }

    /// Start a streaming assistant message
    ///
    /// Returns the active message id if one is already streaming, so a
    /// response never renders as two entries.
    pub fn start_streaming(&self) -> String {
        let (message, position) = {
            let mut inner = lock(&self.inner);
            if let Some(id) = &inner.streaming_id {
                return id.clone();
            }
            let (message, position) = inner.insert(NewMessage {
                is_streaming: true,
                ..NewMessage::new(Role::Assistant, String::new())
            });
            inner.streaming_id = Some(message.id.clone());
            (message, position)
        };

        tracing::debug!(id = %message.id, "assistant streaming started");
        self.announce_added(&message, position);
        self.emit(TimelineEvent::StreamingStarted {
            id: message.id.clone(),
        });
        message.id
    }

    /// Append a delta to the streaming message, starting one if needed
    ///
    /// Returns the streaming message id
    pub fn append_streaming(&self, delta: &str) -> String {
        let id = self.start_streaming();

        let content = {
            let mut inner = lock(&self.inner);
            match inner.find_mut(&id) {
                Some(message) => {
                    message.content.push_str(delta);
                    message.content.clone()
                }
                None => return id,
            }
        };

        let patch = MessagePatch::content(content);
        if let Some(renderer) = &self.renderer {
            renderer.update_message(&id, &patch);
        }
        self.emit(TimelineEvent::MessageUpdated {
            id: id.clone(),
            patch,
        });
        id
    }

    /// Freeze the streaming message and persist it as an assistant turn
    ///
    /// The turn keeps the time streaming began, so a reload orders it the
    /// same way the live timeline did. Returns `None` without persisting or
    /// emitting when nothing is streaming. Persistence failures are logged;
    /// the message stays rendered.
    pub async fn finalize_streaming(&self) -> Option<DisplayMessage> {
        let finalized = {
            let mut inner = lock(&self.inner);
            let id = inner.streaming_id.take()?;
            let message = inner.find_mut(&id)?;
            message.is_streaming = false;
            message.clone()
        };

        tracing::debug!(
            id = %finalized.id,
            chars = finalized.content.len(),
            "assistant streaming finalized"
        );

        let patch = MessagePatch::finished();
        if let Some(renderer) = &self.renderer {
            renderer.update_message(&finalized.id, &patch);
        }
        self.emit(TimelineEvent::MessageUpdated {
            id: finalized.id.clone(),
            patch,
        });

        if !finalized.content.trim().is_empty() {
            let timestamp = finalized.timestamp;
            self.persist(|conversation_id| {
                Turn::assistant(conversation_id, &finalized.content, timestamp)
            })
            .await;
        }

        self.emit(TimelineEvent::StreamingFinalized {
            id: finalized.id.clone(),
            content: finalized.content.clone(),
        });
        Some(finalized)
    }

    /// Finalize at most once per response id
    ///
    /// Returns whether a message was finalized
    pub async fn complete_response(&self, response_id: &str) -> bool {
        if lock(&self.dedup).is_duplicate(response_id) {
            tracing::debug!(response_id, "duplicate completion ignored");
            return false;
        }
        self.finalize_streaming().await.is_some()
    }

    /// Route any completion signal to a single finalize
    ///
    /// Returns whether a message was finalized
    pub async fn signal_completion(&self, signal: CompletionSignal) -> bool {
        match signal {
            CompletionSignal::StreamingStopped | CompletionSignal::SessionChanged => {
                self.finalize_streaming().await.is_some()
            }
            CompletionSignal::ResponseDone(response_id) => {
                self.complete_response(&response_id).await
            }
        }
    }

    /// Show a provisional user message at speech start
    ///
    /// Returns the existing placeholder id if one is already pending
    pub fn begin_pending_user(&self) -> String {
        let (message, position) = {
            let mut inner = lock(&self.inner);
            if let Some(id) = &inner.pending_user_id {
                return id.clone();
            }
            let (message, position) =
                inner.insert(NewMessage::new(Role::User, LISTENING_PLACEHOLDER));
            inner.pending_user_id = Some(message.id.clone());
            (message, position)
        };

        tracing::debug!(id = %message.id, "pending user message shown");
        self.announce_added(&message, position);
        message.id
    }

    /// Whether a provisional user message is waiting for its transcript
    #[must_use]
    pub fn has_pending_user(&self) -> bool {
        lock(&self.inner).pending_user_id.is_some()
    }

    /// Replace the provisional user message with the final transcript
    ///
    /// The message keeps the timestamp of when the turn began, and the
    /// persisted turn carries that same timestamp. Without a pending
    /// message this behaves like [`ConversationTimeline::record_user_message`].
    pub async fn resolve_pending_user(&self, text: &str) -> DisplayMessage {
        let pending = lock(&self.inner).pending_user_id.take();

        let resolved = match pending {
            Some(id) => self.update_message(&id, MessagePatch::content(text)).ok(),
            None => None,
        };
        let Some(message) = resolved else {
            return self.record_user_message(text).await;
        };

        let timestamp = message.timestamp;
        self.persist(|conversation_id| Turn::user(conversation_id, text, timestamp))
            .await;
        message
    }

    /// Render a user message immediately and persist it
    ///
    /// The message stays rendered even if persistence fails, so a failed
    /// send can be retried by the user.
    pub async fn record_user_message(&self, text: &str) -> DisplayMessage {
        let message = self.add_message(NewMessage::new(Role::User, text));
        let timestamp = message.timestamp;
        self.persist(|conversation_id| Turn::user(conversation_id, text, timestamp))
            .await;
        message
    }

    /// Remove every message
    pub fn clear(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.messages.clear();
            inner.streaming_id = None;
            inner.pending_user_id = None;
        }
        lock(&self.dedup).clear();

        if let Some(renderer) = &self.renderer {
            renderer.clear();
        }
        self.emit(TimelineEvent::Cleared);
    }

    /// Replace the timeline with persisted history
    ///
    /// Blank halves are skipped. A turn carrying both halves becomes a user
    /// message followed by an assistant message at the same timestamp.
    pub fn load_from_history(&self, turns: &[Turn]) -> usize {
        let mut sorted: Vec<&Turn> = turns.iter().collect();
        sorted.sort_by_key(|t| t.timestamp);

        let count = {
            let mut inner = lock(&self.inner);
            inner.messages.clear();
            inner.streaming_id = None;
            inner.pending_user_id = None;

            for turn in sorted {
                if let Some(text) = turn.user_text() {
                    inner.insert(NewMessage::new(Role::User, text).at(turn.timestamp));
                }
                if let Some(text) = turn.assistant_text() {
                    inner.insert(NewMessage::new(Role::Assistant, text).at(turn.timestamp));
                }
            }
            inner.messages.len()
        };

        tracing::debug!(turns = turns.len(), messages = count, "timeline loaded from history");
        if let Some(renderer) = &self.renderer {
            renderer.load_from_history(turns);
        }
        self.emit(TimelineEvent::HistoryLoaded { messages: count });
        count
    }

    /// Register a timeline event listener
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TimelineEvent) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    /// Remove a timeline event listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    async fn persist<F>(&self, build: F)
    where
        F: FnOnce(&str) -> Turn + Send,
    {
        let Some(store) = &self.store else {
            return;
        };

        let conversation_id = match self.conversation_id() {
            Some(id) => id,
            None => match store.current_conversation_id().await {
                Ok(id) => {
                    self.set_conversation_id(id.clone());
                    id
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to resolve conversation for turn");
                    return;
                }
            },
        };

        let turn = build(&conversation_id);
        if let Err(e) = store.add_conversation_turn(&turn).await {
            tracing::error!(
                error = %e,
                conversation_id = %conversation_id,
                turn_id = %turn.id,
                "failed to persist turn"
            );
        }
    }

    fn emit(&self, event: TimelineEvent) {
        self.listeners.notify(&event);
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        turns: Mutex<Vec<Turn>>,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ConversationStore for MemoryStore {
        async fn current_conversation_id(&self) -> Result<String> {
            Ok("conv".to_string())
        }

        async fn conversation_exists(&self, conversation_id: &str) -> Result<bool> {
            Ok(conversation_id == "conv")
        }

        async fn add_conversation_turn(&self, turn: &Turn) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            lock(&self.turns).push(turn.clone());
            Ok(())
        }

        async fn get_conversation_history(&self, _conversation_id: &str) -> Result<Vec<Turn>> {
            Ok(lock(&self.turns).clone())
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn ids(timeline: &ConversationTimeline) -> Vec<String> {
        timeline.messages().into_iter().map(|m| m.id).collect()
    }

    #[test]
    fn identical_timestamps_keep_creation_order() {
        let timeline = ConversationTimeline::new();
        timeline.add_message(NewMessage::new(Role::User, "first").with_id("a").at(at(1000)));
        timeline.add_message(NewMessage::new(Role::Assistant, "second").with_id("b").at(at(1000)));
        assert_eq!(ids(&timeline), vec!["a", "b"]);
    }

    #[test]
    fn out_of_order_arrivals_are_sorted() {
        let timeline = ConversationTimeline::new();
        for (id, ms) in [("c", 3000), ("a", 1000), ("d", 3000), ("b", 2000)] {
            timeline.add_message(NewMessage::new(Role::User, id).with_id(id).at(at(ms)));
        }
        assert_eq!(ids(&timeline), vec!["a", "b", "c", "d"]);

        let messages = timeline.messages();
        assert!(messages.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
    }

    #[test]
    fn update_preserves_timestamp_and_position() {
        let timeline = ConversationTimeline::new();
        timeline.add_message(NewMessage::new(Role::User, "…").with_id("p").at(at(1000)));
        timeline.add_message(NewMessage::new(Role::Assistant, "reply").with_id("r").at(at(2000)));

        let updated = timeline
            .update_message("p", MessagePatch::content("hello"))
            .unwrap();
        assert_eq!(updated.timestamp, at(1000));
        assert_eq!(updated.content, "hello");
        assert_eq!(ids(&timeline), vec!["p", "r"]);

        assert!(matches!(
            timeline.update_message("missing", MessagePatch::finished()),
            Err(Error::MessageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn streaming_accumulates_into_one_message() {
        let timeline = ConversationTimeline::new();
        let first = timeline.append_streaming("Hel");
        let second = timeline.append_streaming("lo");
        assert_eq!(first, second);
        assert_eq!(timeline.start_streaming(), first);
        assert_eq!(timeline.len(), 1);

        let finalized = timeline.finalize_streaming().await.unwrap();
        assert_eq!(finalized.content, "Hello");
        assert!(!finalized.is_streaming);
        assert_eq!(timeline.len(), 1);
        assert!(!timeline.is_streaming());
    }

    #[tokio::test]
    async fn finalize_twice_persists_once() {
        let store = Arc::new(MemoryStore::default());
        let timeline = ConversationTimeline::new()
            .with_store(Arc::clone(&store) as Arc<dyn ConversationStore>);
        let finalized = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&finalized);
        timeline.add_listener(move |e| {
            if matches!(e, TimelineEvent::StreamingFinalized { .. }) {
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        timeline.append_streaming("answer");
        assert!(timeline.finalize_streaming().await.is_some());
        assert!(timeline.finalize_streaming().await.is_none());

        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
        let turns = lock(&store.turns);
        assert_eq!(turns[0].assistant_response.as_deref(), Some("answer"));
        assert_eq!(turns[0].conversation_id, "conv");
    }

    #[tokio::test]
    async fn stopped_then_session_changed_finalizes_once() {
        let store = Arc::new(MemoryStore::default());
        let timeline = ConversationTimeline::new()
            .with_store(Arc::clone(&store) as Arc<dyn ConversationStore>);

        timeline.append_streaming("done");
        assert!(timeline.signal_completion(CompletionSignal::StreamingStopped).await);
        assert!(!timeline.signal_completion(CompletionSignal::SessionChanged).await);
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_response_done_is_collapsed() {
        let timeline = ConversationTimeline::new();

        timeline.append_streaming("one");
        assert!(timeline.complete_response("resp_1").await);

        // A late duplicate must not close the next response early
        timeline.append_streaming("two");
        assert!(!timeline.complete_response("resp_1").await);
        assert!(timeline.is_streaming());
        assert!(timeline.complete_response("resp_2").await);
    }

    #[tokio::test]
    async fn pending_user_keeps_original_timestamp() {
        let store = Arc::new(MemoryStore::default());
        let timeline = ConversationTimeline::new()
            .with_store(Arc::clone(&store) as Arc<dyn ConversationStore>);

        let id = timeline.begin_pending_user();
        assert_eq!(timeline.begin_pending_user(), id);
        let started = timeline.get(&id).unwrap().timestamp;

        timeline.append_streaming("reply");
        let resolved = timeline.resolve_pending_user("Hello world").await;

        assert_eq!(resolved.id, id);
        assert_eq!(resolved.timestamp, started);
        assert_eq!(resolved.content, "Hello world");
        assert_eq!(timeline.messages()[0].id, id);
        assert!(!timeline.has_pending_user());
        assert_eq!(lock(&store.turns)[0].timestamp, started);
    }

    #[test]
    fn history_expands_combined_turns() {
        let timeline = ConversationTimeline::new();
        let turns = vec![
            Turn {
                id: "t2".to_string(),
                timestamp: at(2000),
                user_transcript: Some("how are you".to_string()),
                assistant_response: Some("fine".to_string()),
                conversation_id: "conv".to_string(),
            },
            Turn::user("conv", "hi", at(1000)),
            Turn::assistant("conv", "   ", at(1500)),
        ];

        assert_eq!(timeline.load_from_history(&turns), 3);
        let contents: Vec<String> = timeline.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["hi", "how are you", "fine"]);
    }

    #[tokio::test]
    async fn clear_drops_streaming_state() {
        let timeline = ConversationTimeline::new();
        timeline.append_streaming("partial");
        timeline.clear();
        assert!(timeline.is_empty());
        assert!(timeline.finalize_streaming().await.is_none());
    }
}
