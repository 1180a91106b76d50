//! Per-session orchestration
//!
//! Wires one state machine, voice channel, text channel, timeline and
//! bootstrap together and routes transport events between them. Nothing here
//! is a singleton: every client owns its controllers.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::events::EventBus;
use crate::session::{BootstrapOptions, BootstrapResult, SessionBootstrap};
use crate::state::{InteractionStateMachine, VoiceOptions};
use crate::text::{ConnectFn, TextChannel};
use crate::timeline::{CompletionSignal, ConversationTimeline, Renderer};
use crate::transport::{Transport, TransportConnector, TransportEvent};
use crate::voice::{MicrophoneSource, VoiceChannel};
use crate::{Error, Result, lock};

/// Status line shown while the user is speaking
const LISTENING_STATUS: &str = "Listening…";

/// External collaborators of a client
#[derive(Clone)]
pub struct ClientDeps {
    pub store: Arc<dyn ConversationStore>,
    pub connector: Arc<dyn TransportConnector>,
    pub microphone: Arc<dyn MicrophoneSource>,
    pub renderer: Option<Arc<dyn Renderer>>,
}

type SessionSlot = Arc<Mutex<Option<Arc<dyn Transport>>>>;

/// One interaction session
pub struct InteractionClient {
    bus: Arc<EventBus>,
    state: Arc<InteractionStateMachine>,
    voice: Arc<VoiceChannel>,
    text: Arc<TextChannel>,
    timeline: Arc<ConversationTimeline>,
    bootstrap: Arc<SessionBootstrap>,
    options: BootstrapOptions,
    session: SessionSlot,
    connecting: tokio::sync::Mutex<()>,
    auto_connect: bool,
    start_hands_free: bool,
}

impl std::fmt::Debug for InteractionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionClient")
            .field("state", &self.state.get_state())
            .field("timeline", &self.timeline)
            .field("connected", &self.session().is_some())
            .finish_non_exhaustive()
    }
}

impl InteractionClient {
    /// Build every controller for one session
    #[must_use]
    pub fn new(deps: ClientDeps, config: &Config) -> Self {
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(InteractionStateMachine::new().with_bus(Arc::clone(&bus)));

        let mut timeline = ConversationTimeline::new()
            .with_store(Arc::clone(&deps.store))
            .with_bus(Arc::clone(&bus));
        if let Some(renderer) = deps.renderer {
            timeline = timeline.with_renderer(renderer);
        }
        let timeline = Arc::new(timeline);

        let bootstrap = Arc::new(
            SessionBootstrap::new(deps.store, deps.connector)
                .with_timeline(Arc::clone(&timeline))
                .with_bus(Arc::clone(&bus)),
        );

        let options = config.bootstrap_options();
        let session: SessionSlot = Arc::new(Mutex::new(None));

        let voice = Arc::new(VoiceChannel::new(
            Arc::clone(&state),
            deps.microphone,
            Some(Arc::clone(&bus)),
        ));

        let text = Arc::new(
            TextChannel::new(
                Arc::clone(&state),
                config.text_channel_config(),
                Some(Arc::clone(&bus)),
            )
            .with_connector(auto_connect(
                Arc::clone(&bootstrap),
                options.clone(),
                Arc::clone(&session),
            )),
        );

        Self {
            bus,
            state,
            voice,
            text,
            timeline,
            bootstrap,
            options,
            session,
            connecting: tokio::sync::Mutex::new(()),
            auto_connect: config.text.auto_connect,
            start_hands_free: config.voice.start_hands_free,
        }
    }

    /// Shared event bus
    #[must_use]
    pub const fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Interaction state machine
    #[must_use]
    pub const fn state(&self) -> &Arc<InteractionStateMachine> {
        &self.state
    }

    /// Voice channel
    #[must_use]
    pub const fn voice(&self) -> &Arc<VoiceChannel> {
        &self.voice
    }

    /// Text channel
    #[must_use]
    pub const fn text(&self) -> &Arc<TextChannel> {
        &self.text
    }

    /// Conversation timeline
    #[must_use]
    pub const fn timeline(&self) -> &Arc<ConversationTimeline> {
        &self.timeline
    }

    /// Connected transport, if any
    #[must_use]
    pub fn session(&self) -> Option<Arc<dyn Transport>> {
        lock(&self.session).clone()
    }

    /// Bootstrap the session and attach the transport to the text channel
    ///
    /// # Errors
    ///
    /// Returns the bootstrap error; the client stays disconnected
    pub async fn connect(&self) -> Result<BootstrapResult> {
        self.connect_with(self.options.clone()).await
    }

    /// Bootstrap with explicit options (e.g. to resume another conversation)
    ///
    /// # Errors
    ///
    /// Returns the bootstrap error; the client stays disconnected
    pub async fn connect_with(&self, options: BootstrapOptions) -> Result<BootstrapResult> {
        let result = self.bootstrap.bootstrap_session(options).await?;

        *lock(&self.session) = Some(Arc::clone(&result.session));
        self.text.attach_transport(Arc::clone(&result.session));

        if self.start_hands_free
            && let Err(e) = self.voice.set_hands_free(true).await
        {
            tracing::warn!(error = %e, "could not start in hands-free mode");
        }

        Ok(result)
    }

    /// Render a user message optimistically, then queue it for sending
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyMessage`] for blank input without rendering
    /// anything; send failures arrive as `text_channel:error` events
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }

        // The bootstrap read must not see the message it is about to send
        self.ensure_connected().await;
        self.timeline.record_user_message(text).await;
        self.text.send_text(text).await
    }

    /// Bootstrap once before the first send when auto-connect is on
    ///
    /// A failure is left for the text channel to report on the send path.
    async fn ensure_connected(&self) {
        if !self.auto_connect || self.session().is_some() {
            return;
        }

        let _connecting = self.connecting.lock().await;
        if self.session().is_some() {
            return;
        }
        if let Err(e) = self.connect().await {
            tracing::warn!(error = %e, "connect before first send failed");
        }
    }

    /// Switch to voice if needed and start hands-free listening
    ///
    /// Returns whether hands-free is now on
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be acquired
    pub async fn enable_hands_free(&self) -> Result<bool> {
        if !self.state.get_state().is_voice() {
            self.state.transition_to_voice(VoiceOptions {
                armed: false,
                hands_free: false,
            });
        }
        self.voice.set_hands_free(true).await?;
        Ok(self.state.is_hands_free())
    }

    /// Forward captured microphone audio to the transport while armed
    ///
    /// # Errors
    ///
    /// Returns error if encoding or sending fails
    pub async fn forward_audio(&self) -> Result<usize> {
        match self.session() {
            Some(session) => self.voice.forward_audio(session.as_ref()).await,
            None => {
                // Nothing to send to; drop what was captured
                drop(self.voice.take_captured_audio());
                Ok(0)
            }
        }
    }

    /// Route one transport event through the controllers
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::SpeechStarted => {
                self.voice.handle_speech_start();
                if self.state.is_armed() {
                    self.timeline.begin_pending_user();
                    self.timeline.set_status(LISTENING_STATUS, false);
                }
            }
            TransportEvent::SpeechStopped => {
                self.voice.handle_speech_stop();
                self.timeline.set_status("", true);
            }
            TransportEvent::InputTranscript { text, is_final } => {
                if !self.voice.handle_transcript(&text, is_final) {
                    return;
                }
                if is_final {
                    self.timeline.resolve_pending_user(text.trim()).await;
                    self.timeline.set_status("", true);
                } else {
                    self.timeline.set_status(text.trim(), true);
                }
            }
            TransportEvent::ResponseDelta { delta, .. } => {
                self.timeline.append_streaming(&delta);
            }
            TransportEvent::ResponseDone { response_id } => {
                self.timeline
                    .signal_completion(CompletionSignal::ResponseDone(response_id))
                    .await;
            }
            TransportEvent::SessionChanged => {
                self.timeline
                    .signal_completion(CompletionSignal::SessionChanged)
                    .await;
            }
            TransportEvent::Error { message } => {
                tracing::warn!(error = %message, "transport reported an error");
                self.timeline.set_status(&message, false);
            }
        }
    }

    /// Pump transport events until the sender closes
    pub async fn run_transport_events(&self, mut rx: broadcast::Receiver<TransportEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_transport_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "transport event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("transport event stream closed");
                    break;
                }
            }
        }
    }

    /// Tear down both channels and every bus listener
    pub fn dispose(&self) {
        self.voice.dispose();
        self.text.dispose();
        self.bus.clear();
        lock(&self.session).take();
        tracing::info!("interaction client disposed");
    }
}

/// Connect callback for the text channel: bootstrap on demand and share the session
fn auto_connect(
    bootstrap: Arc<SessionBootstrap>,
    options: BootstrapOptions,
    session: SessionSlot,
) -> ConnectFn {
    Arc::new(move || {
        let bootstrap = Arc::clone(&bootstrap);
        let options = options.clone();
        let session = Arc::clone(&session);
        async move {
            let result = bootstrap.bootstrap_session(options).await?;
            *lock(&session) = Some(Arc::clone(&result.session));
            Ok::<_, Error>(result.session)
        }
        .boxed()
    })
}
