//! Interaction state machine
//!
//! Single authority for `{mode, armed, hands_free}`. Channels read the state
//! and request transitions; they never write it. Every transition that changes
//! observable state emits exactly one [`StateEvent::Changed`]; requests that
//! would be no-ops, or that are illegal in the current mode, return `false`
//! and emit nothing.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{EventBus, ListenerId, Listeners};
use crate::lock;

/// Which input channel may currently produce content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    /// Spoken audio
    #[default]
    Voice,
    /// Typed text
    Text,
}

impl InteractionMode {
    /// String form used in logs and config
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the interaction state
///
/// `armed` and `hands_free` only carry meaning in voice mode; a text-mode
/// state always has both cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionState {
    pub mode: InteractionMode,
    pub armed: bool,
    pub hands_free: bool,
}

impl InteractionState {
    /// Voice mode, unarmed, push-to-talk
    pub const INITIAL: Self = Self {
        mode: InteractionMode::Voice,
        armed: false,
        hands_free: false,
    };

    /// Text mode (voice dimensions collapsed)
    pub const TEXT: Self = Self {
        mode: InteractionMode::Text,
        armed: false,
        hands_free: false,
    };

    /// Whether the voice channel owns the turn
    #[must_use]
    pub const fn is_voice(&self) -> bool {
        matches!(self.mode, InteractionMode::Voice)
    }
}

impl Default for InteractionState {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// A committed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: InteractionState,
    pub to: InteractionState,
    pub timestamp: DateTime<Utc>,
}

impl StateChange {
    /// Armed flag went from false to true
    #[must_use]
    pub const fn armed_rose(&self) -> bool {
        !self.from.armed && self.to.armed
    }

    /// Armed flag went from true to false
    #[must_use]
    pub const fn armed_fell(&self) -> bool {
        self.from.armed && !self.to.armed
    }
}

/// Events published by the state machine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// State changed
    Changed(StateChange),
}

impl StateEvent {
    /// Bus topic
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Changed(_) => "state:changed",
        }
    }
}

/// Options for entering voice mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceOptions {
    pub armed: bool,
    pub hands_free: bool,
}

/// Owner of the interaction state
#[derive(Debug, Default)]
pub struct InteractionStateMachine {
    state: Mutex<InteractionState>,
    listeners: Listeners<StateEvent>,
    bus: Option<Arc<EventBus>>,
}

impl InteractionStateMachine {
    /// Create a state machine in the initial state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also publish transitions on a shared bus
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Current state snapshot
    #[must_use]
    pub fn get_state(&self) -> InteractionState {
        *lock(&self.state)
    }

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> InteractionMode {
        self.get_state().mode
    }

    /// Whether voice is armed
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.get_state().armed
    }

    /// Whether hands-free (VAD-driven) mode is on
    #[must_use]
    pub fn is_hands_free(&self) -> bool {
        self.get_state().hands_free
    }

    /// Enter voice mode with the given arm/hands-free flags
    pub fn transition_to_voice(&self, options: VoiceOptions) -> bool {
        self.transition("transition_to_voice", |_| {
            Some(InteractionState {
                mode: InteractionMode::Voice,
                armed: options.armed,
                hands_free: options.hands_free,
            })
        })
    }

    /// Enter text mode, implicitly muting voice and leaving hands-free
    pub fn transition_to_text(&self) -> bool {
        self.transition("transition_to_text", |_| Some(InteractionState::TEXT))
    }

    /// Arm voice capture
    pub fn arm_voice(&self) -> bool {
        self.transition("arm_voice", |current| {
            voice_only(current, "arm_voice")?;
            Some(InteractionState {
                armed: true,
                ..*current
            })
        })
    }

    /// Mute voice capture
    pub fn mute_voice(&self) -> bool {
        self.transition("mute_voice", |current| {
            voice_only(current, "mute_voice")?;
            Some(InteractionState {
                armed: false,
                ..*current
            })
        })
    }

    /// Flip hands-free mode
    pub fn toggle_hands_free(&self) -> bool {
        self.transition("toggle_hands_free", |current| {
            voice_only(current, "toggle_hands_free")?;
            Some(hands_free_state(current, !current.hands_free))
        })
    }

    /// Enable or disable hands-free mode
    ///
    /// Enabling arms, disabling unarms; both happen in one transition.
    pub fn set_hands_free(&self, enabled: bool) -> bool {
        self.transition("set_hands_free", |current| {
            voice_only(current, "set_hands_free")?;
            Some(hands_free_state(current, enabled))
        })
    }

    /// Return to the initial state
    pub fn reset(&self) -> bool {
        self.transition("reset", |_| Some(InteractionState::INITIAL))
    }

    /// Register a transition listener
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    /// Remove a transition listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Compute and commit a transition atomically, then notify outside the lock
    fn transition<F>(&self, op: &'static str, next: F) -> bool
    where
        F: FnOnce(&InteractionState) -> Option<InteractionState>,
    {
        let change = {
            let mut state = lock(&self.state);
            let Some(to) = next(&state) else {
                return false;
            };
            if to == *state {
                tracing::trace!(op, "transition is a no-op");
                return false;
            }
            let from = *state;
            *state = to;
            StateChange {
                from,
                to,
                timestamp: Utc::now(),
            }
        };

        tracing::debug!(
            op,
            from_mode = %change.from.mode,
            to_mode = %change.to.mode,
            armed = change.to.armed,
            hands_free = change.to.hands_free,
            "interaction state changed"
        );

        let event = StateEvent::Changed(change);
        self.listeners.notify(&event);
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
        true
    }
}

/// Refuse voice-only operations while typing
fn voice_only(current: &InteractionState, op: &'static str) -> Option<()> {
    if current.is_voice() {
        Some(())
    } else {
        tracing::warn!(op, "ignored in text mode; transition to voice first");
        None
    }
}

const fn hands_free_state(current: &InteractionState, enabled: bool) -> InteractionState {
    InteractionState {
        mode: current.mode,
        armed: enabled,
        hands_free: enabled,
    }
}
