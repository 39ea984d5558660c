use bytes::Bytes;
use serde::Serialize;

use crate::encoder::EncoderError;
use crate::preview::PreviewHandle;
use crate::stream::{CaptureMode, DeviceError, Facing};

/// Observable state of the capture machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Asking {
        mode: CaptureMode,
    },
    Preview {
        mode: CaptureMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        facing: Option<Facing>,
    },
    Denied {
        mode: CaptureMode,
        reason: String,
    },
    Countdown {
        mode: CaptureMode,
        seconds_left: u32,
    },
    Recording {
        mode: CaptureMode,
        limit_secs: u32,
    },
    Review {
        mode: CaptureMode,
        duration_secs: u32,
    },
}

impl CaptureState {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Asking { .. } => "asking",
            CaptureState::Preview { .. } => "preview",
            CaptureState::Denied { .. } => "denied",
            CaptureState::Countdown { .. } => "countdown",
            CaptureState::Recording { .. } => "recording",
            CaptureState::Review { .. } => "review",
        }
    }

    pub fn mode(&self) -> Option<CaptureMode> {
        match self {
            CaptureState::Idle => None,
            CaptureState::Asking { mode }
            | CaptureState::Preview { mode, .. }
            | CaptureState::Denied { mode, .. }
            | CaptureState::Countdown { mode, .. }
            | CaptureState::Recording { mode, .. }
            | CaptureState::Review { mode, .. } => Some(*mode),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CaptureState::Idle)
    }
}

/// A finished recording waiting for accept or discard.
#[derive(Debug)]
pub struct SegmentDraft {
    pub mode: CaptureMode,
    pub payload: Bytes,
    pub mime_type: String,
    pub duration_secs: u32,
    pub preview: PreviewHandle,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Recording budget exhausted")]
    BudgetExhausted,

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("Camera flip is only available for video capture")]
    FlipUnsupported,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("Capture session was cancelled")]
    Cancelled,
}
