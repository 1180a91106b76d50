//! Microphone seam
//!
//! A stream is acquired once and then muted or unmuted through its tracks.
//! Re-acquiring would re-prompt for permission on most platforms.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// One audio track of an acquired stream
pub trait AudioTrack: Send + Sync {
    /// Enable (unmute) or disable (mute) the track without stopping it
    fn set_enabled(&self, enabled: bool);

    /// Whether the track currently captures audio
    fn is_enabled(&self) -> bool;

    /// Stop the track for good
    fn stop(&self);

    /// Drain audio captured since the last call
    fn take_samples(&self) -> Vec<f32> {
        Vec::new()
    }
}

/// An acquired microphone stream
#[derive(Clone)]
pub struct MicrophoneStream {
    tracks: Vec<Arc<dyn AudioTrack>>,
}

impl std::fmt::Debug for MicrophoneStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrophoneStream")
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

impl MicrophoneStream {
    /// Wrap acquired tracks
    #[must_use]
    pub fn new(tracks: Vec<Arc<dyn AudioTrack>>) -> Self {
        Self { tracks }
    }

    /// Audio tracks of this stream
    #[must_use]
    pub fn audio_tracks(&self) -> &[Arc<dyn AudioTrack>] {
        &self.tracks
    }

    /// Mute or unmute every track
    pub fn set_enabled(&self, enabled: bool) {
        for track in &self.tracks {
            track.set_enabled(enabled);
        }
    }

    /// Stop every track
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Drain captured audio from every track
    #[must_use]
    pub fn take_samples(&self) -> Vec<f32> {
        self.tracks.iter().flat_map(|t| t.take_samples()).collect()
    }
}

/// Source of microphone streams (permission prompt, device selection)
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Acquire the microphone
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Microphone`] when permission is denied or no
    /// device is available
    async fn request_microphone(&self) -> Result<MicrophoneStream>;
}
