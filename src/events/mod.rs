//! Typed publish/subscribe for interaction events
//!
//! Every controller owns a [`Listeners`] registry for its own event type.
//! Controllers also forward into a shared, topic-keyed [`EventBus`] so the
//! UI can subscribe to `state:changed`, `voice_channel:*`, `text_channel:*`
//! and friends without knowing which controller emitted them.
//!
//! Dispatch is synchronous: the listener list is snapshotted under the lock,
//! the lock is released, then listeners run. A listener may therefore add or
//! remove listeners, or trigger further events, without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::lock;
use crate::session::SessionEvent;
use crate::state::StateEvent;
use crate::text::TextEvent;
use crate::timeline::TimelineEvent;
use crate::voice::VoiceEvent;

/// Channel capacity for async bus subscribers
const CHANNEL_CAPACITY: usize = 256;

/// Topic that receives every event
pub const WILDCARD: &str = "*";

/// Process-wide listener id source, so ids never collide across registries
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned on registration, used to remove the listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Typed listener registry owned by a single controller
pub struct Listeners<E> {
    entries: Mutex<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

impl<E> Listeners<E> {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        lock(&self.entries).push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener
    ///
    /// Returns false if the id was not registered here
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Deliver an event to every listener in registration order
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = lock(&self.entries)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for cb in snapshot {
            cb(event);
        }
    }

    /// Drop every listener
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Number of registered listeners
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether no listener is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tagged union of everything the interaction core publishes
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", content = "event", rename_all = "snake_case")]
pub enum InteractionEvent {
    /// Interaction state transition
    State(StateEvent),
    /// Voice channel activity
    Voice(VoiceEvent),
    /// Text channel activity
    Text(TextEvent),
    /// Timeline mutation
    Timeline(TimelineEvent),
    /// Session lifecycle
    Session(SessionEvent),
}

impl InteractionEvent {
    /// Bus topic for this event (e.g. `"voice_channel:transcript"`)
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::State(e) => e.topic(),
            Self::Voice(e) => e.topic(),
            Self::Text(e) => e.topic(),
            Self::Timeline(e) => e.topic(),
            Self::Session(e) => e.topic(),
        }
    }
}

impl From<StateEvent> for InteractionEvent {
    fn from(event: StateEvent) -> Self {
        Self::State(event)
    }
}

impl From<VoiceEvent> for InteractionEvent {
    fn from(event: VoiceEvent) -> Self {
        Self::Voice(event)
    }
}

impl From<TextEvent> for InteractionEvent {
    fn from(event: TextEvent) -> Self {
        Self::Text(event)
    }
}

impl From<TimelineEvent> for InteractionEvent {
    fn from(event: TimelineEvent) -> Self {
        Self::Timeline(event)
    }
}

impl From<SessionEvent> for InteractionEvent {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}

/// Topic-keyed event bus shared by the controllers of one session
pub struct EventBus {
    topics: Mutex<HashMap<String, Vec<(ListenerId, Callback<InteractionEvent>)>>>,
    tx: broadcast::Sender<InteractionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics: Vec<String> = lock(&self.topics).keys().cloned().collect();
        f.debug_struct("EventBus").field("topics", &topics).finish()
    }
}

impl EventBus {
    /// Create a new bus with no listeners
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            topics: Mutex::new(HashMap::new()),
            tx,
        }
    }

    /// Listen on a topic, or on [`WILDCARD`] for everything
    pub fn on<F>(&self, topic: &str, listener: F) -> ListenerId
    where
        F: Fn(&InteractionEvent) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        lock(&self.topics)
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener from whichever topic holds it
    pub fn off(&self, id: ListenerId) -> bool {
        let mut topics = lock(&self.topics);
        let mut removed = false;
        for listeners in topics.values_mut() {
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            removed |= listeners.len() != before;
        }
        topics.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    /// Publish an event to topic listeners, wildcard listeners, then async subscribers
    pub fn emit(&self, event: impl Into<InteractionEvent>) {
        let event = event.into();
        let topic = event.topic();

        let snapshot: Vec<Callback<InteractionEvent>> = {
            let topics = lock(&self.topics);
            [topic, WILDCARD]
                .iter()
                .filter_map(|t| topics.get(*t))
                .flatten()
                .map(|(_, cb)| Arc::clone(cb))
                .collect()
        };

        tracing::trace!(topic, listeners = snapshot.len(), "emitting event");

        for cb in snapshot {
            cb(&event);
        }

        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Subscribe to every event asynchronously
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InteractionEvent> {
        self.tx.subscribe()
    }

    /// Number of listeners on a topic
    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        lock(&self.topics).get(topic).map_or(0, Vec::len)
    }

    /// Remove every synchronous listener
    pub fn clear(&self) {
        lock(&self.topics).clear();
    }
}
