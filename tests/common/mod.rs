//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_interact::transport::ConnectContext;
use beacon_interact::{
    AgentInfo, AudioTrack, ConnectRequest, ConnectedSession, ConversationStore, DbPool,
    DisplayMessage, Error, MessagePatch, MicrophoneSource, MicrophoneStream, Renderer, Result,
    Transport, TransportConnector, TransportEvent, Turn, TurnRepo, db,
};
use tokio::sync::broadcast;

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Store over an in-memory database that counts history reads
pub struct CountingStore {
    pub repo: TurnRepo,
    pub history_reads: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            repo: TurnRepo::new(setup_test_db()),
            history_reads: AtomicUsize::new(0),
        })
    }

    pub fn reads(&self) -> usize {
        self.history_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationStore for CountingStore {
    async fn current_conversation_id(&self) -> Result<String> {
        self.repo.current_conversation()
    }

    async fn conversation_exists(&self, conversation_id: &str) -> Result<bool> {
        self.repo.exists(conversation_id)
    }

    async fn add_conversation_turn(&self, turn: &Turn) -> Result<()> {
        self.repo.add(turn)
    }

    async fn get_conversation_history(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        self.history_reads.fetch_add(1, Ordering::SeqCst);
        self.repo.history(conversation_id)
    }
}

/// Transport that records what it was asked to send
pub struct MockTransport {
    pub sent: Mutex<Vec<String>>,
    pub audio: Mutex<Vec<usize>>,
    pub failures_left: AtomicUsize,
    pub connected: AtomicBool,
    tx: broadcast::Sender<TransportEvent>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            audio: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            tx,
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Publish an event to subscribers
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Transport("socket closed".to_string()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_audio(&self, wav: &[u8]) -> Result<()> {
        self.audio.lock().unwrap().push(wav.len());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<TransportEvent>> {
        Some(self.tx.subscribe())
    }
}

/// Connector handing out one [`MockTransport`] and recording requests
pub struct MockConnector {
    pub transport: Arc<MockTransport>,
    pub requests: Mutex<Vec<ConnectRequest>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            transport: MockTransport::new(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_context(&self) -> Option<ConnectContext> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|r| r.context.clone())
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect_with_history(&self, request: ConnectRequest) -> Result<ConnectedSession> {
        self.requests.lock().unwrap().push(request);
        Ok(ConnectedSession {
            session: Arc::clone(&self.transport) as Arc<dyn Transport>,
            agent: AgentInfo {
                name: "mock".to_string(),
                voice: Some("alloy".to_string()),
            },
        })
    }
}

/// One renderer call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCall {
    Add { id: String, position: usize },
    Update { id: String, patch: MessagePatch },
    Status { text: String, muted: bool },
    Clear,
    History { turns: usize },
}

/// Renderer that records every call
#[derive(Default)]
pub struct RecordingRenderer {
    pub calls: Mutex<Vec<RenderCall>>,
}

impl RecordingRenderer {
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RenderCall::Status { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn add_message(&self, message: &DisplayMessage, position: usize) {
        self.calls.lock().unwrap().push(RenderCall::Add {
            id: message.id.clone(),
            position,
        });
    }

    fn update_message(&self, id: &str, patch: &MessagePatch) {
        self.calls.lock().unwrap().push(RenderCall::Update {
            id: id.to_string(),
            patch: patch.clone(),
        });
    }

    fn set_status(&self, text: &str, muted: bool) {
        self.calls.lock().unwrap().push(RenderCall::Status {
            text: text.to_string(),
            muted,
        });
    }

    fn clear(&self) {
        self.calls.lock().unwrap().push(RenderCall::Clear);
    }

    fn load_from_history(&self, turns: &[Turn]) {
        self.calls
            .lock()
            .unwrap()
            .push(RenderCall::History { turns: turns.len() });
    }
}

/// Track that buffers whatever the test pushes while enabled
#[derive(Default)]
pub struct FakeTrack {
    pub enabled: AtomicBool,
    pub stopped: AtomicBool,
    pub samples: Mutex<Vec<f32>>,
}

impl FakeTrack {
    /// Simulate the device delivering audio
    pub fn push(&self, samples: &[f32]) {
        if self.is_enabled() {
            self.samples.lock().unwrap().extend_from_slice(samples);
        }
    }
}

impl AudioTrack for FakeTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn take_samples(&self) -> Vec<f32> {
        std::mem::take(&mut *self.samples.lock().unwrap())
    }
}

/// Microphone that hands out one [`FakeTrack`]
#[derive(Default)]
pub struct FakeMicrophone {
    pub track: Arc<FakeTrack>,
    pub requests: AtomicUsize,
    pub deny: bool,
}

impl FakeMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            ..Self::default()
        })
    }
}

#[async_trait]
impl MicrophoneSource for FakeMicrophone {
    async fn request_microphone(&self) -> Result<MicrophoneStream> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(Error::Microphone("permission denied".to_string()));
        }
        Ok(MicrophoneStream::new(vec![
            Arc::clone(&self.track) as Arc<dyn AudioTrack>
        ]))
    }
}
