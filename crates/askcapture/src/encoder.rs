//! Recorder boundary and a WAV implementation.
//!
//! `MediaEncoder::start` begins consuming a live stream and hands back an
//! `EncodingSession`; `finish()` finalizes it into an in-memory payload.
//! `WavEncoder` pulls the stream's audio track on a 10 ms cadence and writes
//! 16-bit mono PCM with `hound`.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::stream::{CaptureMode, MediaStream};

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("Failed to start encoder: {0}")]
    Start(String),

    #[error("Failed to finalize recording: {0}")]
    Finalize(String),
}

/// A finalized recording.
#[derive(Debug, Clone)]
pub struct EncodedMedia {
    pub payload: Bytes,
    pub mime_type: String,
}

pub trait MediaEncoder: Send + Sync {
    fn start(
        &self,
        mode: CaptureMode,
        stream: &MediaStream,
    ) -> Result<Box<dyn EncodingSession>, EncoderError>;
}

#[async_trait]
pub trait EncodingSession: Send {
    /// Stop consuming the stream and produce the payload.
    async fn finish(self: Box<Self>) -> Result<EncodedMedia, EncoderError>;

    /// Drop everything recorded so far.
    fn abort(self: Box<Self>);
}

const TICK: Duration = Duration::from_millis(10);

/// Records the first audio track of a stream as WAV. Streams without audio
/// record silence for their duration.
#[derive(Debug, Clone)]
pub struct WavEncoder {
    sample_rate: u32,
}

impl WavEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Default for WavEncoder {
    fn default() -> Self {
        Self::new(48_000)
    }
}

impl MediaEncoder for WavEncoder {
    fn start(
        &self,
        mode: CaptureMode,
        stream: &MediaStream,
    ) -> Result<Box<dyn EncodingSession>, EncoderError> {
        if self.sample_rate < 100 {
            return Err(EncoderError::Start(format!(
                "sample rate {} is too low",
                self.sample_rate
            )));
        }

        let track = stream.audio_tracks().next().cloned();
        let chunk = (self.sample_rate / 100) as usize;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        debug!(
            capture.mode = %mode,
            has_audio = track.is_some(),
            sample_rate = self.sample_rate,
            "WAV encoder started"
        );

        let handle = tokio::spawn(async move {
            let mut samples: Vec<f32> = Vec::new();
            let mut ticker = tokio::time::interval(TICK);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let start = samples.len();
                        samples.resize(start + chunk, 0.0);
                        if let Some(track) = &track {
                            track.pull_audio(&mut samples[start..]);
                        }
                    }
                }
            }
            samples
        });

        Ok(Box::new(WavSession {
            sample_rate: self.sample_rate,
            stop: Some(stop_tx),
            handle,
        }))
    }
}

struct WavSession {
    sample_rate: u32,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Vec<f32>>,
}

#[async_trait]
impl EncodingSession for WavSession {
    async fn finish(mut self: Box<Self>) -> Result<EncodedMedia, EncoderError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        let samples = (&mut self.handle)
            .await
            .map_err(|e| EncoderError::Finalize(e.to_string()))?;
        let payload = encode_wav(&samples, self.sample_rate)?;

        Ok(EncodedMedia {
            payload,
            mime_type: "audio/wav".to_string(),
        })
    }

    fn abort(self: Box<Self>) {
        self.handle.abort();
    }
}

/// 16-bit mono PCM.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Bytes, EncoderError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| EncoderError::Finalize(e.to_string()))?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| EncoderError::Finalize(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| EncoderError::Finalize(e.to_string()))?;
    }

    Ok(Bytes::from(cursor.into_inner()))
}
