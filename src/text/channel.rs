//! Text channel
//!
//! Serializes outgoing text through a FIFO queue. Every item requests the
//! text-mode transition before its first send attempt, so voice capture is
//! muted before any network I/O happens. Runtime failures are reported as
//! [`TextEvent::Error`] rather than returned, since callers of
//! [`TextChannel::send_text`] are usually UI handlers that cannot await a
//! retry loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;

use super::retry::{RetryPolicy, delay_for_attempt};
use crate::events::{EventBus, ListenerId, Listeners};
use crate::state::InteractionStateMachine;
use crate::transport::Transport;
use crate::{Error, Result, lock};

/// Injected connect callback used when no transport is attached
pub type ConnectFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Transport>>> + Send + Sync>;

/// A queued message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingTextItem {
    pub text: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Why a text send failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextErrorKind {
    /// No transport and auto-connect disabled
    TransportUnavailable,
    /// Auto-connect failed after every retry
    ConnectFailed,
    /// The transport rejected the send after every retry
    SendFailed,
}

impl TextErrorKind {
    const fn from_error(error: &Error) -> Self {
        match error {
            Error::TransportUnavailable => Self::TransportUnavailable,
            Error::Connect(_) => Self::ConnectFailed,
            _ => Self::SendFailed,
        }
    }
}

/// Events published by the text channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextEvent {
    /// Message accepted into the queue
    Queued { text: String, pending: usize },
    /// Message handed to the transport
    Sent { text: String },
    /// Message dropped
    Error {
        text: String,
        kind: TextErrorKind,
        message: String,
        attempts: u32,
    },
    /// Pending messages dropped by [`TextChannel::clear_queue`]
    QueueCleared { dropped: usize },
    /// Auto-connect started
    Connecting,
    /// Auto-connect attached a transport
    Connected,
}

impl TextEvent {
    /// Bus topic
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "text_channel:queued",
            Self::Sent { .. } => "text_channel:sent",
            Self::Error { .. } => "text_channel:error",
            Self::QueueCleared { .. } => "text_channel:queue_cleared",
            Self::Connecting => "text_channel:connecting",
            Self::Connected => "text_channel:connected",
        }
    }
}

/// Text channel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChannelConfig {
    /// Invoke the connect callback when no transport is attached
    pub auto_connect: bool,
    /// Retry policy for connect and send failures
    pub retry: RetryPolicy,
}

impl Default for TextChannelConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Snapshot of the text channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChannelState {
    pub pending: usize,
    pub processing: bool,
    pub connected: bool,
    pub auto_connect: bool,
    pub disposed: bool,
}

/// Resets the processing flag even if the send future is dropped
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outgoing text controller
pub struct TextChannel {
    state: Arc<InteractionStateMachine>,
    config: TextChannelConfig,
    connect: Option<ConnectFn>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    queue: Mutex<VecDeque<OutgoingTextItem>>,
    processing: AtomicBool,
    disposed: AtomicBool,
    listeners: Listeners<TextEvent>,
    bus: Option<Arc<EventBus>>,
}

impl std::fmt::Debug for TextChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextChannel")
            .field("config", &self.config)
            .field("state", &self.get_state())
            .finish_non_exhaustive()
    }
}

impl TextChannel {
    /// Create a text channel with no transport attached
    #[must_use]
    pub fn new(
        state: Arc<InteractionStateMachine>,
        config: TextChannelConfig,
        bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            state,
            config,
            connect: None,
            transport: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            listeners: Listeners::new(),
            bus,
        }
    }

    /// Set the callback used to auto-connect
    #[must_use]
    pub fn with_connector(mut self, connect: ConnectFn) -> Self {
        self.connect = Some(connect);
        self
    }

    /// Attach a transport for subsequent sends
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        tracing::debug!(transport = transport.name(), "text transport attached");
        *lock(&self.transport) = Some(transport);
    }

    /// Detach the current transport
    pub fn detach_transport(&self) -> Option<Arc<dyn Transport>> {
        lock(&self.transport).take()
    }

    /// Queue a message and process the queue
    ///
    /// The text is trimmed. If another call is already draining the queue,
    /// this returns once the item is queued; the active call sends it in order.
    /// Send failures are reported through [`TextEvent::Error`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyMessage`] for blank input and
    /// [`Error::Disposed`] after [`TextChannel::dispose`]; neither has side effects
    pub async fn send_text(&self, text: &str) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed("text channel"));
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let pending = {
            let mut queue = lock(&self.queue);
            queue.push_back(OutgoingTextItem {
                text: text.to_string(),
                enqueued_at: Utc::now(),
            });
            queue.len()
        };
        tracing::debug!(pending, "text message queued");
        self.emit(TextEvent::Queued {
            text: text.to_string(),
            pending,
        });

        self.process_queue().await;
        Ok(())
    }

    /// Drop pending messages; an in-flight send is unaffected
    ///
    /// Returns the number of messages dropped
    pub fn clear_queue(&self) -> usize {
        let dropped = {
            let mut queue = lock(&self.queue);
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        if dropped > 0 {
            tracing::debug!(dropped, "text queue cleared");
            self.emit(TextEvent::QueueCleared { dropped });
        }
        dropped
    }

    /// Messages waiting to be sent
    #[must_use]
    pub fn pending(&self) -> Vec<OutgoingTextItem> {
        lock(&self.queue).iter().cloned().collect()
    }

    /// Snapshot for synchronous inspection
    #[must_use]
    pub fn get_state(&self) -> TextChannelState {
        TextChannelState {
            pending: lock(&self.queue).len(),
            processing: self.processing.load(Ordering::SeqCst),
            connected: lock(&self.transport)
                .as_ref()
                .is_some_and(|t| t.is_connected()),
            auto_connect: self.config.auto_connect,
            disposed: self.disposed.load(Ordering::SeqCst),
        }
    }

    /// Register a text event listener
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TextEvent) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    /// Remove a text event listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Tear down: drop pending messages, listeners and the transport
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.queue).clear();
        lock(&self.transport).take();
        self.listeners.clear();
        tracing::debug!("text channel disposed");
    }

    /// Become the queue processor, or leave it to the one already running
    async fn process_queue(&self) {
        loop {
            if self.processing.swap(true, Ordering::SeqCst) {
                return;
            }
            {
                let _guard = ProcessingGuard(&self.processing);
                while let Some(item) = self.next_item() {
                    self.deliver(item).await;
                }
            }
            // An item queued between the last pop and the flag reset would
            // otherwise be stranded
            if lock(&self.queue).is_empty() || self.disposed.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    fn next_item(&self) -> Option<OutgoingTextItem> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        lock(&self.queue).pop_front()
    }

    async fn deliver(&self, item: OutgoingTextItem) {
        // Mute voice before any network I/O
        self.state.transition_to_text();

        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.try_send(&item.text).await {
                Ok(()) => {
                    tracing::debug!(attempt, "text message sent");
                    self.emit(TextEvent::Sent { text: item.text });
                    return;
                }
                Err(e) if e.is_recoverable() && attempt < policy.max_retries => {
                    let delay = delay_for_attempt(policy, attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "text send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempts = attempt + 1, "text message dropped");
                    self.emit(TextEvent::Error {
                        text: item.text,
                        kind: TextErrorKind::from_error(&e),
                        message: e.to_string(),
                        attempts: attempt + 1,
                    });
                    return;
                }
            }
        }
    }

    async fn try_send(&self, text: &str) -> Result<()> {
        let transport = self.ensure_transport().await?;
        transport.send_message(text).await
    }

    async fn ensure_transport(&self) -> Result<Arc<dyn Transport>> {
        let attached = lock(&self.transport)
            .as_ref()
            .filter(|t| t.is_connected())
            .cloned();
        if let Some(transport) = attached {
            return Ok(transport);
        }

        let connect = match (&self.connect, self.config.auto_connect) {
            (Some(connect), true) => Arc::clone(connect),
            _ => return Err(Error::TransportUnavailable),
        };

        tracing::info!("no transport attached, auto-connecting");
        self.emit(TextEvent::Connecting);
        let transport = connect().await.map_err(|e| match e {
            Error::Connect(_) => e,
            other => Error::Connect(other.to_string()),
        })?;

        *lock(&self.transport) = Some(Arc::clone(&transport));
        self.emit(TextEvent::Connected);
        Ok(transport)
    }

    fn emit(&self, event: TextEvent) {
        self.listeners.notify(&event);
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::FutureExt;

    use super::*;
    use crate::state::VoiceOptions;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        failures_left: AtomicUsize,
        latency: Duration,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_message(&self, text: &str) -> Result<()> {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Transport("socket closed".to_string()));
            }
            lock(&self.sent).push(text.to_string());
            Ok(())
        }

        async fn send_audio(&self, _wav: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    type Events = Arc<Mutex<Vec<TextEvent>>>;

    fn channel(config: TextChannelConfig) -> (Arc<InteractionStateMachine>, TextChannel, Events) {
        let state = Arc::new(InteractionStateMachine::new());
        let channel = TextChannel::new(Arc::clone(&state), config, None);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        channel.add_listener(move |e| lock(&sink).push(e.clone()));
        (state, channel, events)
    }

    fn no_auto_connect() -> TextChannelConfig {
        TextChannelConfig {
            auto_connect: false,
            ..TextChannelConfig::default()
        }
    }

    #[tokio::test]
    async fn blank_input_is_rejected_without_side_effects() {
        let (state, channel, events) = channel(TextChannelConfig::default());
        state.arm_voice();

        let err = channel.send_text("   \n").await.unwrap_err();
        assert!(matches!(err, Error::EmptyMessage));
        assert!(state.is_armed());
        assert!(lock(&events).is_empty());
    }

    #[tokio::test]
    async fn send_trims_and_mutes_voice_first() {
        let (state, channel, events) = channel(TextChannelConfig::default());
        let transport = Arc::new(RecordingTransport::default());
        channel.attach_transport(Arc::clone(&transport) as Arc<dyn Transport>);
        state.transition_to_voice(VoiceOptions {
            armed: true,
            hands_free: false,
        });

        channel.send_text("  Hello  ").await.unwrap();

        assert!(!state.is_armed());
        assert_eq!(*lock(&transport.sent), vec!["Hello".to_string()]);
        let sent = lock(&events)
            .iter()
            .filter(|e| matches!(e, TextEvent::Sent { .. }))
            .count();
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn missing_transport_without_auto_connect_emits_error() {
        let (state, channel, events) = channel(no_auto_connect());

        tokio_test::assert_ok!(channel.send_text("hi").await);

        assert_eq!(state.get_state(), crate::state::InteractionState::TEXT);
        let events = lock(&events);
        assert!(matches!(
            events.last(),
            Some(TextEvent::Error {
                kind: TextErrorKind::TransportUnavailable,
                attempts: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn auto_connect_attaches_transport_once() {
        let transport = Arc::new(RecordingTransport::default());
        let connects = Arc::new(AtomicUsize::new(0));
        let (_, channel, events) = channel(TextChannelConfig::default());

        let t = Arc::clone(&transport);
        let c = Arc::clone(&connects);
        let channel = channel.with_connector(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let transport = Arc::clone(&t) as Arc<dyn Transport>;
            async move { Ok::<_, Error>(transport) }.boxed()
        }));

        channel.send_text("one").await.unwrap();
        channel.send_text("two").await.unwrap();

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(*lock(&transport.sent), vec!["one", "two"]);
        let events = lock(&events);
        assert!(events.contains(&TextEvent::Connecting));
        assert!(events.contains(&TextEvent::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (_, channel, events) = channel(TextChannelConfig::default());
        let transport = Arc::new(RecordingTransport {
            failures_left: AtomicUsize::new(2),
            ..RecordingTransport::default()
        });
        channel.attach_transport(Arc::clone(&transport) as Arc<dyn Transport>);

        let start = tokio::time::Instant::now();
        channel.send_text("retry me").await.unwrap();

        assert_eq!(*lock(&transport.sent), vec!["retry me"]);
        // Two fixed 500ms delays
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1500));
        assert!(matches!(lock(&events).last(), Some(TextEvent::Sent { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_emit_error() {
        let config = TextChannelConfig {
            retry: RetryPolicy::fixed(1, Duration::from_millis(50)),
            ..TextChannelConfig::default()
        };
        let (_, channel, events) = channel(config);
        let transport = Arc::new(RecordingTransport {
            failures_left: AtomicUsize::new(5),
            ..RecordingTransport::default()
        });
        channel.attach_transport(transport);

        channel.send_text("doomed").await.unwrap();

        assert!(matches!(
            lock(&events).last(),
            Some(TextEvent::Error {
                kind: TextErrorKind::SendFailed,
                attempts: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn clear_queue_only_emits_when_something_dropped() {
        let (_, channel, events) = channel(no_auto_connect());
        assert_eq!(channel.clear_queue(), 0);
        assert!(lock(&events).is_empty());
    }

    /// Channel over a transport that takes 100ms per send
    fn slow_channel() -> (Arc<TextChannel>, Arc<RecordingTransport>, Events) {
        let (_, channel, events) = channel(TextChannelConfig::default());
        let transport = Arc::new(RecordingTransport {
            latency: Duration::from_millis(100),
            ..RecordingTransport::default()
        });
        channel.attach_transport(Arc::clone(&transport) as Arc<dyn Transport>);
        (Arc::new(channel), transport, events)
    }

    async fn wait_until_processing(channel: &TextChannel) {
        while !channel.get_state().processing {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clear_queue_drops_pending_but_not_in_flight() {
        let (channel, transport, events) = slow_channel();

        let c = Arc::clone(&channel);
        let first = tokio::spawn(async move { c.send_text("a").await });
        wait_until_processing(&channel).await;

        // The active processor owns delivery, so these return once queued
        for text in ["b", "c", "d"] {
            channel.send_text(text).await.unwrap();
        }
        assert_eq!(channel.get_state().pending, 3);

        assert_eq!(channel.clear_queue(), 3);
        first.await.unwrap().unwrap();

        assert_eq!(*lock(&transport.sent), vec!["a"]);
        let events = lock(&events);
        assert!(events.contains(&TextEvent::QueueCleared { dropped: 3 }));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, TextEvent::Sent { .. }))
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sends_go_out_in_call_order() {
        let (channel, transport, _) = slow_channel();

        let c = Arc::clone(&channel);
        let first = tokio::spawn(async move { c.send_text("a").await });
        wait_until_processing(&channel).await;

        let mut handles = vec![first];
        for text in ["b", "c", "d", "e"] {
            let c = Arc::clone(&channel);
            handles.push(tokio::spawn(async move { c.send_text(text).await }));
        }
        // The first caller drains everything queued behind it
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*lock(&transport.sent), vec!["a", "b", "c", "d", "e"]);
        assert!(!channel.get_state().processing);
    }

    #[tokio::test]
    async fn disposed_channel_rejects_sends() {
        let (_, channel, _) = channel(TextChannelConfig::default());
        channel.dispose();
        assert!(matches!(
            channel.send_text("hi").await,
            Err(Error::Disposed(_))
        ));
        assert!(channel.get_state().disposed);
    }
}
