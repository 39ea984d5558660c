//! Runtime settings: capture devices, audio mixing, paths, telemetry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which camera a video session opens first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FacingPreference {
    /// Front camera.
    #[default]
    User,
    /// Back camera.
    Environment,
}

/// Capture state machine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Seconds counted down before recording starts. 0 disables the countdown.
    pub countdown_secs: u32,

    /// Camera used when a video session starts.
    pub default_facing: FacingPreference,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 3,
            default_facing: FacingPreference::User,
        }
    }
}

/// Screen-mode audio mixing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Linear gain applied to display/system audio.
    pub system_gain: f32,

    /// Linear gain applied to the separately acquired microphone.
    pub microphone_gain: f32,

    /// Sample rate of the mixed output track.
    pub sample_rate: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            system_gain: 0.7,
            microphone_gain: 1.0,
            sample_rate: 48_000,
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the content-addressed media store used by the default uploader.
    pub store_dir: PathBuf,
}

impl PathsConfig {
    fn default_store_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".askcapture").join("store"))
            .unwrap_or_else(|| PathBuf::from(".askcapture/store"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            store_dir: Self::default_store_dir(),
        }
    }
}

/// Logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive, e.g. `info` or `askcapture=debug,warn`.
    pub log_level: String,

    /// Emit ANSI colors in log output.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            ansi: true,
        }
    }
}
