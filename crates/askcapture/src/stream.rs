//! Live media streams and the device acquisition boundary.
//!
//! A `MediaStream` is a bundle of `MediaTrack`s handed out by a
//! `CaptureDevices` implementation (browser bridge, OS capture API, or the
//! synthetic devices used in tests). Tracks wrap a `TrackSource`; stopping a
//! track releases the underlying hardware and is forwarded to the source at
//! most once no matter how many clones of the track exist.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a segment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Camera plus microphone.
    Video,
    /// Microphone only.
    Audio,
    /// Display capture plus microphone, mixed.
    Screen,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Video => f.write_str("video"),
            CaptureMode::Audio => f.write_str("audio"),
            CaptureMode::Screen => f.write_str("screen"),
        }
    }
}

/// Camera orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    User,
    Environment,
}

impl Facing {
    pub fn opposite(self) -> Self {
        match self {
            Facing::User => Facing::Environment,
            Facing::Environment => Facing::User,
        }
    }
}

impl From<askconf::FacingPreference> for Facing {
    fn from(pref: askconf::FacingPreference) -> Self {
        match pref {
            askconf::FacingPreference::User => Facing::User,
            askconf::FacingPreference::Environment => Facing::Environment,
        }
    }
}

/// A single acquisition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureRequest {
    /// Camera with microphone audio.
    Camera { facing: Facing },
    /// Microphone only.
    Microphone,
    /// Display/screen capture, with system audio when the platform offers it.
    Display,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Acquisition and release failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("No live capture to operate on")]
    NotLive,

    #[error("Failed to release device: {0}")]
    ReleaseFailed(String),
}

/// Producer behind a track.
///
/// Audio sources hand out mono f32 samples on demand; video sources are opaque
/// to this crate and only need to be stoppable.
pub trait TrackSource: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Fill `out` with the next samples. Returns how many were written.
    fn pull_audio(&self, out: &mut [f32]) -> usize {
        let _ = out;
        0
    }

    /// Release the underlying device.
    fn stop(&self) -> Result<(), DeviceError>;
}

/// One track of a stream. Clones share the same source and stop state.
#[derive(Clone)]
pub struct MediaTrack {
    id: Uuid,
    kind: TrackKind,
    label: String,
    source: Arc<dyn TrackSource>,
    ended: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(label: impl Into<String>, source: Arc<dyn TrackSource>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: source.kind(),
            label: label.into(),
            source,
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &Arc<dyn TrackSource> {
        &self.source
    }

    pub fn is_live(&self) -> bool {
        !self.ended.load(Ordering::SeqCst)
    }

    pub fn pull_audio(&self, out: &mut [f32]) -> usize {
        if !self.is_live() {
            return 0;
        }
        self.source.pull_audio(out)
    }

    /// Stop the track. Only the first call reaches the source.
    pub fn stop(&self) -> Result<(), DeviceError> {
        if self.ended.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.source.stop()
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("live", &self.is_live())
            .finish()
    }
}

/// A set of tracks acquired together.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn has_audio(&self) -> bool {
        self.audio_tracks().next().is_some()
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    /// Stop every track, collecting failures instead of bailing on the first one.
    pub fn stop(&self) -> Vec<DeviceError> {
        self.tracks.iter().filter_map(|t| t.stop().err()).collect()
    }
}

/// Device acquisition boundary.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Acquire a live stream, or report why the platform refused.
    async fn acquire(&self, request: CaptureRequest) -> Result<MediaStream, DeviceError>;
}
