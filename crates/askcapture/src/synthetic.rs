//! Synthetic capture devices.
//!
//! Tone generators stand in for microphones and display audio, placeholder
//! tracks for cameras and screens. Permissions can be denied per device at
//! runtime, which is how the demo binary and the tests exercise the `Denied`
//! paths without real hardware.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use tracing::debug;

use crate::stream::{
    CaptureDevices, CaptureRequest, DeviceError, Facing, MediaStream, MediaTrack, TrackKind,
    TrackSource,
};

/// Individually deniable devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    FrontCamera,
    BackCamera,
    Microphone,
    Display,
}

impl DeviceKind {
    fn camera(facing: Facing) -> Self {
        match facing {
            Facing::User => DeviceKind::FrontCamera,
            Facing::Environment => DeviceKind::BackCamera,
        }
    }

    fn for_request(request: CaptureRequest) -> Vec<Self> {
        match request {
            CaptureRequest::Camera { facing } => {
                vec![DeviceKind::camera(facing), DeviceKind::Microphone]
            }
            CaptureRequest::Microphone => vec![DeviceKind::Microphone],
            CaptureRequest::Display => vec![DeviceKind::Display],
        }
    }
}

struct ToneSource {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    position: AtomicU64,
    live: Arc<AtomicUsize>,
}

impl TrackSource for ToneSource {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn pull_audio(&self, out: &mut [f32]) -> usize {
        let start = self.position.fetch_add(out.len() as u64, Ordering::Relaxed);
        let step = self.frequency / self.sample_rate as f32;
        for (i, sample) in out.iter_mut().enumerate() {
            let phase = ((start + i as u64) as f32 * step).fract();
            *sample = (phase * TAU).sin() * self.amplitude;
        }
        out.len()
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct PlaceholderVideo {
    live: Arc<AtomicUsize>,
}

impl TrackSource for PlaceholderVideo {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct SyntheticDevices {
    denied: DashSet<DeviceKind>,
    stalled: DashSet<DeviceKind>,
    display_audio: bool,
    sample_rate: u32,
    attempts: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self {
            denied: DashSet::new(),
            stalled: DashSet::new(),
            display_audio: true,
            sample_rate: 48_000,
            attempts: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Display capture without a system audio track.
    pub fn without_display_audio(mut self) -> Self {
        self.display_audio = false;
        self
    }

    pub fn deny(&self, kind: DeviceKind) {
        self.denied.insert(kind);
    }

    /// Grant `kind` again. Clears a denial or a stall for later requests.
    pub fn allow(&self, kind: DeviceKind) {
        self.denied.remove(&kind);
        self.stalled.remove(&kind);
    }

    /// Leave requests for `kind` unanswered, like a permission prompt nobody
    /// clicks.
    pub fn stall(&self, kind: DeviceKind) {
        self.stalled.insert(kind);
    }

    /// Every call to `acquire`, successful or not.
    pub fn acquisition_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Tracks handed out and not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn check(&self, kind: DeviceKind) -> Result<(), DeviceError> {
        if self.denied.contains(&kind) {
            return Err(DeviceError::PermissionDenied(format!("{:?} access denied", kind)));
        }
        Ok(())
    }

    fn tone(&self, label: &str, frequency: f32, amplitude: f32) -> MediaTrack {
        self.live.fetch_add(1, Ordering::SeqCst);
        MediaTrack::new(
            label,
            Arc::new(ToneSource {
                frequency,
                amplitude,
                sample_rate: self.sample_rate,
                position: AtomicU64::new(0),
                live: Arc::clone(&self.live),
            }),
        )
    }

    fn picture(&self, label: &str) -> MediaTrack {
        self.live.fetch_add(1, Ordering::SeqCst);
        MediaTrack::new(
            label,
            Arc::new(PlaceholderVideo {
                live: Arc::clone(&self.live),
            }),
        )
    }
}

#[async_trait]
impl CaptureDevices for SyntheticDevices {
    async fn acquire(&self, request: CaptureRequest) -> Result<MediaStream, DeviceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if DeviceKind::for_request(request)
            .iter()
            .any(|kind| self.stalled.contains(kind))
        {
            debug!(request = ?request, "Synthetic device request stalled");
            futures::future::pending::<()>().await;
        }

        let tracks = match request {
            CaptureRequest::Camera { facing } => {
                self.check(DeviceKind::camera(facing))?;
                self.check(DeviceKind::Microphone)?;
                vec![
                    self.picture(&format!("camera-{:?}", facing).to_lowercase()),
                    self.tone("microphone", 440.0, 0.5),
                ]
            }
            CaptureRequest::Microphone => {
                self.check(DeviceKind::Microphone)?;
                vec![self.tone("microphone", 440.0, 0.5)]
            }
            CaptureRequest::Display => {
                self.check(DeviceKind::Display)?;
                let mut tracks = vec![self.picture("display")];
                if self.display_audio {
                    tracks.push(self.tone("display-audio", 220.0, 0.5));
                }
                tracks
            }
        };

        debug!(request = ?request, tracks = tracks.len(), "Synthetic devices acquired");
        Ok(MediaStream::new(tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_camera_stream_has_video_and_audio() {
        let devices = SyntheticDevices::new();
        let stream = devices
            .acquire(CaptureRequest::Camera {
                facing: Facing::User,
            })
            .await
            .unwrap();

        assert_eq!(stream.video_tracks().count(), 1);
        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(devices.live_tracks(), 2);

        stream.stop();
        assert_eq!(devices.live_tracks(), 0);
    }

    #[tokio::test]
    async fn test_denial_counts_attempt_but_hands_out_nothing() {
        let devices = SyntheticDevices::new();
        devices.deny(DeviceKind::Display);

        let err = devices.acquire(CaptureRequest::Display).await.unwrap_err();
        assert!(matches!(err, DeviceError::PermissionDenied(_)));
        assert_eq!(devices.acquisition_attempts(), 1);
        assert_eq!(devices.live_tracks(), 0);

        devices.allow(DeviceKind::Display);
        assert!(devices.acquire(CaptureRequest::Display).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_request_never_resolves() {
        let devices = SyntheticDevices::new();
        devices.stall(DeviceKind::Microphone);

        let pending = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            devices.acquire(CaptureRequest::Microphone),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(devices.live_tracks(), 0);

        assert!(devices.acquire(CaptureRequest::Display).await.is_ok());
    }

    #[tokio::test]
    async fn test_tone_is_continuous_across_pulls() {
        let devices = SyntheticDevices::new().with_sample_rate(8_000);
        let stream = devices.acquire(CaptureRequest::Microphone).await.unwrap();
        let track = stream.audio_tracks().next().unwrap();

        let mut whole = vec![0.0f32; 64];
        let mut first = vec![0.0f32; 32];
        let mut second = vec![0.0f32; 32];
        track.pull_audio(&mut first);
        track.pull_audio(&mut second);

        let fresh = devices.acquire(CaptureRequest::Microphone).await.unwrap();
        fresh.audio_tracks().next().unwrap().pull_audio(&mut whole);

        assert_eq!(&whole[..32], &first[..]);
        assert_eq!(&whole[32..], &second[..]);
        assert!(whole.iter().all(|s| s.abs() <= 0.5));
    }
}
