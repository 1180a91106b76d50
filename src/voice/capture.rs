//! Audio capture from the default input device

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};
use tokio::sync::oneshot;

use super::microphone::{AudioTrack, MicrophoneSource, MicrophoneStream};
use crate::{Error, Result, lock};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Microphone backed by `cpal`
///
/// The input stream is owned by a dedicated thread for its whole life, since
/// `cpal` streams cannot move between threads on every platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    /// Create a microphone source for the default input device
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn request_microphone(&self) -> Result<MicrophoneStream> {
        let enabled = Arc::new(AtomicBool::new(false));
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_enabled = Arc::clone(&enabled);
        let thread_buffer = Arc::clone(&buffer);
        std::thread::Builder::new()
            .name("beacon-mic".to_string())
            .spawn(move || {
                let stream = match open_input_stream(thread_enabled, thread_buffer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until stop() or until the track is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        ready_rx
            .await
            .map_err(|_| Error::Microphone("capture thread exited".to_string()))??;

        let track = CpalTrack {
            enabled,
            buffer,
            stop_tx: Mutex::new(Some(stop_tx)),
        };
        Ok(MicrophoneStream::new(vec![Arc::new(track)]))
    }
}

/// Track whose samples are only buffered while enabled
struct CpalTrack {
    enabled: Arc<AtomicBool>,
    buffer: Arc<Mutex<Vec<f32>>>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl AudioTrack for CpalTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Some(tx) = lock(&self.stop_tx).take() {
            let _ = tx.send(());
        }
    }

    fn take_samples(&self) -> Vec<f32> {
        std::mem::take(&mut *lock(&self.buffer))
    }
}

fn open_input_stream(enabled: Arc<AtomicBool>, buffer: Arc<Mutex<Vec<f32>>>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Microphone("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Microphone(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Microphone("no suitable audio config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !enabled.load(Ordering::Relaxed) {
                    return;
                }
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Microphone(e.to_string()))?;

    stream.play().map_err(|e| Error::Microphone(e.to_string()))?;
    tracing::debug!("audio capture started");
    Ok(stream)
}

/// Convert f32 samples to WAV bytes for the transport
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_has_riff_header() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 1.0], SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 4 * 2);
    }

    #[test]
    fn wav_clamps_out_of_range_samples() {
        let wav = samples_to_wav(&[2.0, -2.0], SAMPLE_RATE).unwrap();
        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![32767, -32768]);
    }
}
