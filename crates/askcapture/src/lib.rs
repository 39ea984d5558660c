//! askcapture: question capture and upload pipeline.
//!
//! A user records up to three media segments (camera, voice, or screen with a
//! mixed-in microphone) against a shared time budget, attaches files, and
//! keeps composing while everything uploads in the background.
//!
//! # Components
//!
//! - [`lifecycle::StreamLifecycle`]: sole owner of the live device handle
//! - [`mixer::MixingGraph`]: system audio + microphone for screen recordings
//! - [`capture::CaptureMachine`]: one segment from device request to review
//! - [`upload::UploadQueue`] / [`upload::AttachmentQueue`]: background transfers
//! - [`composer::Composer`]: segment list, budget, payload assembly
//!
//! Devices, the recorder, storage and submission are traits
//! ([`stream::CaptureDevices`], [`encoder::MediaEncoder`], [`upload::Uploader`],
//! [`composer::Submitter`]) so the pipeline runs unchanged against real
//! platforms or the [`synthetic`] devices.

pub mod capture;
pub mod composer;
pub mod encoder;
pub mod lifecycle;
pub mod mixer;
pub mod preview;
pub mod segment;
pub mod stream;
pub mod synthetic;
pub mod telemetry;
pub mod upload;

pub use capture::{CaptureError, CaptureMachine, CaptureState, SegmentDraft};
pub use composer::{Composer, ComposerError, PayloadSegment, QuestionPayload, SegmentView, Submitter};
pub use encoder::{EncodedMedia, EncoderError, EncodingSession, MediaEncoder, WavEncoder};
pub use segment::{Segment, SegmentId};
pub use stream::{CaptureDevices, CaptureMode, CaptureRequest, DeviceError, Facing, MediaStream, MediaTrack};
pub use upload::{
    AttachmentFile, LimitViolation, QueueError, StorageRef, StoreUploader, TaskId, UploadError,
    UploadStatus, UploadTask, Uploader,
};
