//! Realtime transport seam
//!
//! The hosted realtime model is an external collaborator. The core only needs
//! to send text and audio, connect with hydrated history, and receive a small
//! set of events back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::session::RealtimeItem;
use crate::{Error, Result};

/// Channel capacity for transport events
const CHANNEL_CAPACITY: usize = 256;

/// Events a transport reports back to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// Server-side VAD heard the user start speaking
    SpeechStarted,
    /// Server-side VAD heard the user stop speaking
    SpeechStopped,
    /// Recognized user speech
    InputTranscript { text: String, is_final: bool },
    /// Streamed assistant text
    ResponseDelta { response_id: String, delta: String },
    /// Assistant response complete
    ResponseDone { response_id: String },
    /// Session was replaced or updated; any open response is complete
    SessionChanged,
    /// Transport-level failure outside the client's authority
    Error { message: String },
}

/// Minimal transport surface
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &'static str;

    /// Send a user text message
    ///
    /// May be fire-and-forget: `Ok` means handed to the transport, not delivered.
    async fn send_message(&self, text: &str) -> Result<()>;

    /// Send captured audio (16-bit PCM WAV)
    async fn send_audio(&self, wav: &[u8]) -> Result<()>;

    /// Whether the transport still accepts sends
    fn is_connected(&self) -> bool {
        true
    }

    /// Subscribe to transport events, if the transport produces any
    fn subscribe(&self) -> Option<broadcast::Receiver<TransportEvent>> {
        None
    }
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("name", &self.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Context handed to the model alongside hydrated history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectContext {
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// Input to [`TransportConnector::connect_with_history`]
#[derive(Debug, Clone, Serialize)]
pub struct ConnectRequest {
    pub history_items: Vec<RealtimeItem>,
    pub context: ConnectContext,
}

/// Agent the session is talking to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// A connected realtime session
#[derive(Debug, Clone)]
pub struct ConnectedSession {
    pub session: Arc<dyn Transport>,
    pub agent: AgentInfo,
}

/// Opens realtime sessions seeded with history
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connect and hydrate the model context
    async fn connect_with_history(&self, request: ConnectRequest) -> Result<ConnectedSession>;
}

/// In-process transport that answers every message by echoing it back as a
/// streamed assistant response
pub struct LoopbackTransport {
    tx: broadcast::Sender<TransportEvent>,
    connected: AtomicBool,
    hydrated_items: AtomicUsize,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    /// Create a loopback transport
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            connected: AtomicBool::new(false),
            hydrated_items: AtomicUsize::new(0),
        }
    }

    /// Number of history items received on the last connect
    #[must_use]
    pub fn hydrated_items(&self) -> usize {
        self.hydrated_items.load(Ordering::SeqCst)
    }

    /// Mark the transport closed; further sends fail
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.tx.send(TransportEvent::SessionChanged);
    }

    fn publish(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("loopback transport is closed".to_string()));
        }

        let response_id = format!("resp_{}", Uuid::new_v4().simple());
        for (i, word) in text.split_whitespace().enumerate() {
            let delta = if i == 0 {
                word.to_string()
            } else {
                format!(" {word}")
            };
            self.publish(TransportEvent::ResponseDelta {
                response_id: response_id.clone(),
                delta,
            });
        }
        self.publish(TransportEvent::ResponseDone { response_id });
        Ok(())
    }

    async fn send_audio(&self, wav: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("loopback transport is closed".to_string()));
        }
        tracing::debug!(bytes = wav.len(), "loopback received audio");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<TransportEvent>> {
        Some(self.tx.subscribe())
    }
}

#[async_trait]
impl TransportConnector for Arc<LoopbackTransport> {
    async fn connect_with_history(&self, request: ConnectRequest) -> Result<ConnectedSession> {
        self.hydrated_items
            .store(request.history_items.len(), Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);

        tracing::info!(
            conversation_id = %request.context.conversation_id,
            items = request.history_items.len(),
            "loopback session connected"
        );

        Ok(ConnectedSession {
            session: Arc::clone(self) as Arc<dyn Transport>,
            agent: AgentInfo {
                name: "loopback".to_string(),
                voice: None,
            },
        })
    }
}
