//! Voice input
//!
//! Microphone acquisition, capture from the default input device, and the
//! channel that gates transcripts through the interaction state.

mod capture;
mod channel;
mod microphone;

pub use capture::{CpalMicrophone, SAMPLE_RATE, samples_to_wav};
pub use channel::{MicStatus, VoiceChannel, VoiceChannelState, VoiceEvent, VoiceInputMode};
pub use microphone::{AudioTrack, MicrophoneSource, MicrophoneStream};
