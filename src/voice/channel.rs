//! Voice channel
//!
//! Gates every transcript and speech-activity signal from the recognition
//! source through the current [`InteractionState`]. The microphone track
//! mirrors the armed flag: it is unmuted when the state machine arms and
//! muted (never destroyed) when it disarms, whichever component requested
//! the transition.

use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use super::capture::{SAMPLE_RATE, samples_to_wav};
use super::microphone::{MicrophoneSource, MicrophoneStream};
use crate::events::{EventBus, ListenerId, Listeners};
use crate::state::{
    InteractionState, InteractionStateMachine, StateChange, StateEvent, VoiceOptions,
};
use crate::transport::Transport;
use crate::{Error, Result, lock};

/// How arming is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceInputMode {
    /// Push-to-talk: armed only while the control is held
    Ptt,
    /// Hands-free: continuous, VAD-driven
    Vad,
}

/// Microphone acquisition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MicStatus {
    /// Not requested yet
    NotRequested,
    /// Acquired and held
    Ready,
    /// Acquisition failed
    Unavailable,
    /// Tracks stopped on dispose
    Stopped,
}

/// Snapshot of the voice channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceChannelState {
    pub armed: bool,
    pub hands_free: bool,
    pub input_mode: VoiceInputMode,
    pub mic: MicStatus,
    pub is_speaking: bool,
    pub partial_transcript: String,
    pub disposed: bool,
}

/// Events published by the voice channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// Capture armed
    Armed,
    /// Capture muted
    Muted,
    /// Authorized transcript
    Transcript { text: String, is_final: bool },
    /// Hands-free speech began
    SpeechStarted,
    /// Hands-free speech ended
    SpeechStopped,
    /// Hands-free toggled
    HandsFreeChanged { enabled: bool },
    /// Microphone could not be acquired
    MicUnavailable { reason: String },
    /// Channel torn down
    Disposed,
}

impl VoiceEvent {
    /// Bus topic
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Armed => "voice_channel:armed",
            Self::Muted => "voice_channel:muted",
            Self::Transcript { .. } => "voice_channel:transcript",
            Self::SpeechStarted => "voice_channel:speech_started",
            Self::SpeechStopped => "voice_channel:speech_stopped",
            Self::HandsFreeChanged { .. } => "voice_channel:hands_free_changed",
            Self::MicUnavailable { .. } => "voice_channel:mic_unavailable",
            Self::Disposed => "voice_channel:disposed",
        }
    }
}

#[derive(Debug)]
struct Runtime {
    mic_status: MicStatus,
    is_speaking: bool,
    partial_transcript: String,
    disposed: bool,
}

/// State shared with the state-machine listener
struct VoiceInner {
    mic: Mutex<Option<MicrophoneStream>>,
    runtime: Mutex<Runtime>,
    listeners: Listeners<VoiceEvent>,
    bus: Option<Arc<EventBus>>,
}

impl VoiceInner {
    fn emit(&self, event: VoiceEvent) {
        self.listeners.notify(&event);
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
    }

    fn set_tracks_enabled(&self, enabled: bool) {
        if let Some(mic) = lock(&self.mic).as_ref() {
            mic.set_enabled(enabled);
        }
    }

    /// Mirror a committed transition onto the microphone and listeners
    fn on_state_change(&self, change: &StateChange) {
        if lock(&self.runtime).disposed {
            return;
        }

        if change.armed_rose() {
            lock(&self.runtime).partial_transcript.clear();
            self.set_tracks_enabled(true);
            self.emit(VoiceEvent::Armed);
        } else if change.armed_fell() {
            self.set_tracks_enabled(false);
            lock(&self.runtime).is_speaking = false;
            self.emit(VoiceEvent::Muted);
        }

        if change.from.hands_free != change.to.hands_free {
            self.emit(VoiceEvent::HandsFreeChanged {
                enabled: change.to.hands_free,
            });
        }
    }
}

/// Voice input controller
pub struct VoiceChannel {
    state: Arc<InteractionStateMachine>,
    source: Arc<dyn MicrophoneSource>,
    inner: Arc<VoiceInner>,
    acquire: AsyncMutex<()>,
    state_listener: Mutex<Option<ListenerId>>,
}

impl std::fmt::Debug for VoiceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceChannel")
            .field("state", &self.get_state())
            .finish_non_exhaustive()
    }
}

impl VoiceChannel {
    /// Create a voice channel driven by `state`
    #[must_use]
    pub fn new(
        state: Arc<InteractionStateMachine>,
        source: Arc<dyn MicrophoneSource>,
        bus: Option<Arc<EventBus>>,
    ) -> Self {
        let inner = Arc::new(VoiceInner {
            mic: Mutex::new(None),
            runtime: Mutex::new(Runtime {
                mic_status: MicStatus::NotRequested,
                is_speaking: false,
                partial_transcript: String::new(),
                disposed: false,
            }),
            listeners: Listeners::new(),
            bus,
        });

        let weak: Weak<VoiceInner> = Arc::downgrade(&inner);
        let listener = state.add_listener(move |event: &StateEvent| {
            let StateEvent::Changed(change) = event;
            if let Some(inner) = weak.upgrade() {
                inner.on_state_change(change);
            }
        });

        Self {
            state,
            source,
            inner,
            acquire: AsyncMutex::new(()),
            state_listener: Mutex::new(Some(listener)),
        }
    }

    /// Acquire the microphone if not already held
    ///
    /// Tracks start muted unless the state is already armed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Microphone`] if acquisition fails; the channel stays unarmed
    pub async fn initialize(&self) -> Result<()> {
        self.ensure_live()?;
        let _guard = self.acquire.lock().await;

        if lock(&self.inner.mic).is_some() {
            return Ok(());
        }

        match self.source.request_microphone().await {
            Ok(stream) => {
                stream.set_enabled(self.state.is_armed());
                *lock(&self.inner.mic) = Some(stream);
                lock(&self.inner.runtime).mic_status = MicStatus::Ready;
                tracing::info!("microphone acquired");
                Ok(())
            }
            Err(e) => {
                lock(&self.inner.runtime).mic_status = MicStatus::Unavailable;
                tracing::warn!(error = %e, "microphone unavailable");
                self.inner.emit(VoiceEvent::MicUnavailable {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Push-to-talk pressed: acquire if needed, enter voice mode and arm
    ///
    /// Returns whether the state changed. Any stale partial transcript is
    /// cleared so nothing from a previous utterance leaks into this one.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be acquired or the channel is disposed
    pub async fn start_ptt(&self) -> Result<bool> {
        self.initialize().await?;

        lock(&self.inner.runtime).partial_transcript.clear();

        let current = self.state.get_state();
        let changed = if current.is_voice() {
            self.state.arm_voice()
        } else {
            self.state.transition_to_voice(VoiceOptions {
                armed: true,
                hands_free: false,
            })
        };
        Ok(changed)
    }

    /// Push-to-talk released: mute
    ///
    /// Ignored while hands-free is on, since arming is then owned by VAD.
    pub fn stop_ptt(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        if self.state.is_hands_free() {
            tracing::debug!("ptt release ignored in hands-free mode");
            return false;
        }
        self.state.mute_voice()
    }

    /// Enable or disable hands-free mode
    ///
    /// Enabling acquires the microphone and arms; disabling unarms and returns
    /// to push-to-talk. Refused with a warning in text mode.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be acquired or the channel is disposed
    pub async fn set_hands_free(&self, enabled: bool) -> Result<bool> {
        self.ensure_live()?;
        if !self.state.get_state().is_voice() {
            tracing::warn!(enabled, "cannot change hands-free in text mode");
            return Ok(false);
        }
        if enabled {
            self.initialize().await?;
        }
        Ok(self.state.set_hands_free(enabled))
    }

    /// Deliver a transcript from the recognition source
    ///
    /// Partials pass only while armed. Finals always pass: a final legitimately
    /// lands just after PTT release and still belongs to the user. Blank text
    /// never passes. Returns whether an event was emitted.
    pub fn handle_transcript(&self, text: &str, is_final: bool) -> bool {
        let text = text.trim();
        if text.is_empty() || self.is_disposed() {
            return false;
        }

        if is_final {
            lock(&self.inner.runtime).partial_transcript.clear();
        } else {
            if !self.state.is_armed() {
                tracing::trace!("dropping partial transcript while unarmed");
                return false;
            }
            text.clone_into(&mut lock(&self.inner.runtime).partial_transcript);
        }

        self.inner.emit(VoiceEvent::Transcript {
            text: text.to_string(),
            is_final,
        });
        true
    }

    /// VAD activity changed
    pub fn handle_vad_state_change(&self, active: bool) -> bool {
        if active {
            self.handle_speech_start()
        } else {
            self.handle_speech_stop()
        }
    }

    /// Speech started (hands-free only)
    pub fn handle_speech_start(&self) -> bool {
        self.set_speaking(true)
    }

    /// Speech stopped (hands-free only)
    pub fn handle_speech_stop(&self) -> bool {
        self.set_speaking(false)
    }

    fn set_speaking(&self, speaking: bool) -> bool {
        if self.is_disposed() || !self.state.is_hands_free() {
            tracing::trace!(speaking, "vad signal ignored outside hands-free mode");
            return false;
        }

        {
            let mut runtime = lock(&self.inner.runtime);
            if runtime.is_speaking == speaking {
                return false;
            }
            runtime.is_speaking = speaking;
        }

        self.inner.emit(if speaking {
            VoiceEvent::SpeechStarted
        } else {
            VoiceEvent::SpeechStopped
        });
        true
    }

    /// Drain captured audio
    ///
    /// Tracks only buffer while enabled, so this is empty when unarmed.
    #[must_use]
    pub fn take_captured_audio(&self) -> Vec<f32> {
        lock(&self.inner.mic)
            .as_ref()
            .map(MicrophoneStream::take_samples)
            .unwrap_or_default()
    }

    /// Send captured audio to the transport while armed
    ///
    /// Audio drained while unarmed is discarded. Returns the number of samples sent.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or the transport send fails
    pub async fn forward_audio(&self, transport: &dyn Transport) -> Result<usize> {
        let samples = self.take_captured_audio();
        if samples.is_empty() || !self.state.is_armed() {
            return Ok(0);
        }

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        transport.send_audio(&wav).await?;
        Ok(samples.len())
    }

    /// Whether capture is armed
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state.is_armed()
    }

    /// Snapshot for synchronous inspection
    #[must_use]
    pub fn get_state(&self) -> VoiceChannelState {
        let InteractionState {
            armed, hands_free, ..
        } = self.state.get_state();
        let runtime = lock(&self.inner.runtime);
        VoiceChannelState {
            armed,
            hands_free,
            input_mode: if hands_free {
                VoiceInputMode::Vad
            } else {
                VoiceInputMode::Ptt
            },
            mic: runtime.mic_status,
            is_speaking: runtime.is_speaking,
            partial_transcript: runtime.partial_transcript.clone(),
            disposed: runtime.disposed,
        }
    }

    /// Register a voice event listener
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&VoiceEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    /// Remove a voice event listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Tear down: stop microphone tracks and detach from the state machine
    pub fn dispose(&self) {
        {
            let mut runtime = lock(&self.inner.runtime);
            if runtime.disposed {
                return;
            }
            runtime.disposed = true;
            runtime.is_speaking = false;
            runtime.partial_transcript.clear();
        }

        if let Some(id) = lock(&self.state_listener).take() {
            self.state.remove_listener(id);
        }

        if let Some(mic) = lock(&self.inner.mic).take() {
            mic.stop();
            lock(&self.inner.runtime).mic_status = MicStatus::Stopped;
        }

        self.inner.emit(VoiceEvent::Disposed);
        self.inner.listeners.clear();
        tracing::debug!("voice channel disposed");
    }

    fn is_disposed(&self) -> bool {
        lock(&self.inner.runtime).disposed
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed("voice channel"))
        } else {
            Ok(())
        }
    }
}

impl Drop for VoiceChannel {
    fn drop(&mut self) {
        if let Some(id) = lock(&self.state_listener).take() {
            self.state.remove_listener(id);
        }
    }
}
