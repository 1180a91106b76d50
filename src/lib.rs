//! Beacon Interact - voice/text interaction core for AI assistant clients
//!
//! This library decides which input channel may produce content at any
//! instant, keeps one ordered conversation timeline consistent under
//! streaming and out-of-order updates, and hydrates a session from a single
//! history read shared by the UI and the realtime model context.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            UI input (mic button, keypress)            │
//! └───────────────┬──────────────────────┬───────────────┘
//!                 │                      │
//! ┌───────────────▼────────┐  ┌──────────▼───────────────┐
//! │      VoiceChannel      │  │       TextChannel        │
//! │  PTT │ hands-free │ VAD│  │  FIFO │ retry │ connect  │
//! └───────────────┬────────┘  └──────────┬───────────────┘
//!                 │                      │
//! ┌───────────────▼──────────────────────▼───────────────┐
//! │             InteractionStateMachine                   │
//! │        { mode: voice|text, armed, handsFree }         │
//! └───────────────────────────┬──────────────────────────┘
//!                             │
//! ┌───────────────────────────▼──────────────────────────┐
//! │   ConversationTimeline  ◄──  SessionBootstrap (once)  │
//! │   (timestamp, seq) order │ streaming │ dedup          │
//! └───────────────────────────┬──────────────────────────┘
//!                             │
//! ┌───────────────────────────▼──────────────────────────┐
//! │      Renderer │ ConversationStore │ Transport         │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod events;
pub mod session;
pub mod state;
pub mod text;
pub mod timeline;
pub mod transport;
pub mod voice;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use client::{ClientDeps, InteractionClient};
pub use config::Config;
pub use conversation::{ConversationStore, Turn};
pub use db::{DbPool, TurnRepo};
pub use error::{Error, Result};
pub use events::{EventBus, InteractionEvent, ListenerId, Listeners};
pub use session::{
    BootstrapOptions, BootstrapResult, HistorySnapshot, RealtimeItem, SessionBootstrap,
    SessionEvent, map_history_to_items, trim_for_realtime,
};
pub use state::{
    InteractionMode, InteractionState, InteractionStateMachine, StateChange, StateEvent,
    VoiceOptions,
};
pub use text::{RetryPolicy, TextChannel, TextChannelConfig, TextEvent};
pub use timeline::{
    CompletionSignal, ConversationTimeline, DisplayMessage, MessagePatch, NewMessage, Renderer,
    Role, TimelineEvent,
};
pub use transport::{
    AgentInfo, ConnectRequest, ConnectedSession, LoopbackTransport, Transport,
    TransportConnector, TransportEvent,
};
pub use voice::{
    AudioTrack, CpalMicrophone, MicStatus, MicrophoneSource, MicrophoneStream, VoiceChannel,
    VoiceChannelState, VoiceEvent, VoiceInputMode,
};

/// Lock a mutex, recovering the guard if a listener panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
