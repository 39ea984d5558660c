//! Capture State Machine
//!
//! One segment at a time: ask for devices, preview, optionally count down,
//! record against a hard limit, then review. Accepted drafts leave the machine;
//! everything else is released before it returns to idle.

mod machine;
mod state;

pub use machine::{CaptureMachine, CaptureSettings};
pub use state::{CaptureError, CaptureState, SegmentDraft};
