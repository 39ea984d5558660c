//! Composer Coordinator
//!
//! Owns the accepted segments and both upload queues, gates new recordings on
//! the segment count and the remaining budget, and assembles the question
//! payload from whatever has finished uploading.

use std::sync::Arc;

use askconf::{AskConfig, LimitsConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, CaptureMachine, CaptureState};
use crate::encoder::MediaEncoder;
use crate::preview::PreviewStore;
use crate::segment::{self, Segment, SegmentId};
use crate::stream::{CaptureDevices, CaptureMode};
use crate::upload::{
    AttachmentFile, AttachmentLimits, AttachmentQueue, ItemKind, QueueError, StorageRef, TaskId,
    UploadMetadata, UploadQueue, UploadSubject, UploadTask, Uploader,
};

#[derive(Debug, thiserror::Error)]
pub enum ComposerError {
    #[error("Title must be at least {min} characters")]
    TitleTooShort { min: usize },

    #[error("{in_flight} upload(s) still in progress")]
    Busy { in_flight: usize },

    #[error("At most {limit} segments can be recorded")]
    SegmentLimit { limit: usize },

    #[error("Segment not found: {0}")]
    SegmentNotFound(SegmentId),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Submission failed: {0:#}")]
    Submit(anyhow::Error),
}

/// A segment reference in the submitted question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSegment {
    pub mode: CaptureMode,
    pub order: usize,
    pub storage_reference: StorageRef,
    pub duration_seconds: u32,
}

/// What gets handed to the submission collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    pub title: String,
    pub text: String,
    pub segments: Vec<PayloadSegment>,
    pub attachments: Vec<StorageRef>,
}

/// Receives the assembled question.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, payload: &QuestionPayload) -> anyhow::Result<()>;
}

/// Render model for one accepted segment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentView {
    pub id: SegmentId,
    pub mode: CaptureMode,
    pub duration_secs: u32,
    pub order: usize,
    pub preview_url: String,
    pub upload: Option<UploadTask>,
}

pub struct Composer {
    limits: LimitsConfig,
    capture: CaptureMachine,
    segments: Vec<Segment>,
    segment_uploads: UploadQueue,
    attachments: AttachmentQueue,
}

impl Composer {
    pub fn new(
        config: &AskConfig,
        devices: Arc<dyn CaptureDevices>,
        encoder: Arc<dyn MediaEncoder>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        let capture = CaptureMachine::new(
            devices,
            encoder,
            PreviewStore::new(),
            &config.capture,
            &config.mixer,
        );

        Self {
            limits: config.limits.clone(),
            capture,
            segments: Vec::new(),
            segment_uploads: UploadQueue::new(ItemKind::Segment, Arc::clone(&uploader), &config.upload),
            attachments: AttachmentQueue::new(
                uploader,
                AttachmentLimits::from(&config.limits),
                &config.upload,
            ),
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn capture(&self) -> &CaptureMachine {
        &self.capture
    }

    pub fn segment_uploads(&self) -> &UploadQueue {
        &self.segment_uploads
    }

    pub fn attachment_queue(&self) -> &AttachmentQueue {
        &self.attachments
    }

    pub fn used_secs(&self) -> u32 {
        segment::used_secs(&self.segments)
    }

    /// Always derived from the accepted segments.
    pub fn remaining_secs(&self) -> u32 {
        segment::remaining_secs(self.limits.total_budget_secs, &self.segments)
    }

    pub async fn start_segment(&mut self, mode: CaptureMode) -> Result<CaptureState, ComposerError> {
        if self.segments.len() >= self.limits.max_segments {
            return Err(ComposerError::SegmentLimit {
                limit: self.limits.max_segments,
            });
        }
        Ok(self.capture.start_segment(mode, self.remaining_secs()).await?)
    }

    pub async fn retry_capture(&self) -> Result<CaptureState, ComposerError> {
        Ok(self.capture.retry().await?)
    }

    pub async fn flip_camera(&self) -> Result<CaptureState, ComposerError> {
        Ok(self.capture.flip_camera().await?)
    }

    pub async fn begin_recording(&self) -> Result<CaptureState, ComposerError> {
        Ok(self.capture.begin_recording().await?)
    }

    pub async fn stop_recording(&self) -> Result<CaptureState, ComposerError> {
        Ok(self.capture.stop_recording().await?)
    }

    pub async fn cancel_capture(&self) {
        self.capture.cancel().await
    }

    /// Keep the reviewed recording and start uploading it.
    pub async fn accept_segment(&mut self) -> Result<SegmentId, ComposerError> {
        let draft = self.capture.accept().await?;
        let id = SegmentId::new();

        let metadata = UploadMetadata {
            subject: UploadSubject::Segment {
                segment_id: id,
                mode: draft.mode,
                duration_secs: draft.duration_secs,
            },
            mime_type: draft.mime_type.clone(),
            size_bytes: draft.payload.len() as u64,
            order: self.segments.len(),
        };
        let task = self.segment_uploads.enqueue(draft.payload.clone(), metadata);

        info!(
            segment.id = %id,
            segment.mode = %draft.mode,
            segment.duration_secs = draft.duration_secs,
            task.id = %task,
            "Segment accepted"
        );

        self.segments.push(Segment::new(id, draft, task));
        Ok(id)
    }

    pub async fn discard_segment(&self) -> Result<CaptureState, ComposerError> {
        Ok(self.capture.discard().await?)
    }

    fn position(&self, id: SegmentId) -> Result<usize, ComposerError> {
        self.segments
            .iter()
            .position(|s| s.id == id)
            .ok_or(ComposerError::SegmentNotFound(id))
    }

    /// Push list positions into the queue's ordering metadata.
    fn renumber(&self) {
        for (order, segment) in self.segments.iter().enumerate() {
            if let Err(err) = self.segment_uploads.set_order(segment.upload, order) {
                warn!(segment.id = %segment.id, error = %err, "Failed to update segment order");
            }
        }
    }

    pub fn move_up(&mut self, id: SegmentId) -> Result<(), ComposerError> {
        let idx = self.position(id)?;
        if idx > 0 {
            self.segments.swap(idx, idx - 1);
            self.renumber();
        }
        Ok(())
    }

    pub fn move_down(&mut self, id: SegmentId) -> Result<(), ComposerError> {
        let idx = self.position(id)?;
        if idx + 1 < self.segments.len() {
            self.segments.swap(idx, idx + 1);
            self.renumber();
        }
        Ok(())
    }

    /// Drop a segment: its upload is cancelled, its preview revoked and its
    /// seconds return to the budget.
    pub fn remove_segment(&mut self, id: SegmentId) -> Result<(), ComposerError> {
        let idx = self.position(id)?;
        let segment = self.segments.remove(idx);

        if let Err(err) = self.segment_uploads.remove(segment.upload) {
            warn!(segment.id = %id, error = %err, "Segment upload already gone");
        }
        segment.preview.revoke();
        self.renumber();

        info!(segment.id = %id, remaining_secs = self.remaining_secs(), "Segment removed");
        Ok(())
    }

    pub fn retry_segment_upload(&self, id: SegmentId) -> Result<(), ComposerError> {
        let idx = self.position(id)?;
        Ok(self.segment_uploads.retry(self.segments[idx].upload)?)
    }

    pub fn segments(&self) -> Vec<SegmentView> {
        self.segments
            .iter()
            .enumerate()
            .map(|(order, s)| SegmentView {
                id: s.id,
                mode: s.mode,
                duration_secs: s.duration_secs,
                order,
                preview_url: s.preview.url(),
                upload: self.segment_uploads.get(s.upload),
            })
            .collect()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn add_attachments(&self, files: Vec<AttachmentFile>) -> Result<Vec<TaskId>, ComposerError> {
        Ok(self.attachments.enqueue_batch(files)?)
    }

    pub fn remove_attachment(&self, id: TaskId) -> Result<(), ComposerError> {
        self.attachments.remove(id)?;
        Ok(())
    }

    pub fn retry_attachment(&self, id: TaskId) -> Result<(), ComposerError> {
        Ok(self.attachments.retry(id)?)
    }

    pub fn attachments(&self) -> Vec<UploadTask> {
        self.attachments.snapshot()
    }

    pub fn is_busy(&self) -> bool {
        self.segment_uploads.is_busy() || self.attachments.is_busy()
    }

    fn in_flight(&self) -> usize {
        self.segment_uploads
            .snapshot()
            .into_iter()
            .chain(self.attachments.snapshot())
            .filter(|t| t.status.in_flight())
            .count()
    }

    /// Resolve once neither queue has anything pending or uploading.
    pub async fn wait_for_uploads(&self) {
        futures::future::join(
            self.segment_uploads.wait_idle(),
            self.attachments.wait_idle(),
        )
        .await;
    }

    /// Build the question from successfully uploaded items only. Items still
    /// uploading or failed are left out without error.
    pub fn assemble_payload(&self, title: &str, text: &str) -> Result<QuestionPayload, ComposerError> {
        let title = title.trim();
        if title.chars().count() < self.limits.min_title_chars {
            return Err(ComposerError::TitleTooShort {
                min: self.limits.min_title_chars,
            });
        }

        let segments = self
            .segment_uploads
            .get_successful()
            .into_iter()
            .filter_map(|task| {
                let segment = self.segments.iter().find(|s| s.upload == task.id)?;
                Some((segment.mode, segment.duration_secs, task.result?))
            })
            .enumerate()
            .map(|(order, (mode, duration_seconds, storage_reference))| PayloadSegment {
                mode,
                order,
                storage_reference,
                duration_seconds,
            })
            .collect();

        let attachments = self
            .attachments
            .get_successful()
            .into_iter()
            .filter_map(|task| task.result)
            .collect();

        Ok(QuestionPayload {
            title: title.to_string(),
            text: text.to_string(),
            segments,
            attachments,
        })
    }

    /// Submit the question once every upload has settled.
    pub async fn proceed(
        &self,
        title: &str,
        text: &str,
        submitter: &dyn Submitter,
    ) -> Result<QuestionPayload, ComposerError> {
        if self.is_busy() {
            return Err(ComposerError::Busy {
                in_flight: self.in_flight(),
            });
        }

        let payload = self.assemble_payload(title, text)?;
        submitter
            .submit(&payload)
            .await
            .map_err(ComposerError::Submit)?;

        info!(
            segments = payload.segments.len(),
            attachments = payload.attachments.len(),
            "Question submitted"
        );
        Ok(payload)
    }

    /// Release everything: capture session, devices, previews, uploads.
    pub async fn teardown(&mut self) {
        self.capture.cancel().await;
        for segment in self.segments.drain(..) {
            segment.preview.revoke();
        }
        self.segment_uploads.cancel_all();
        self.attachments.cancel_all();
        debug!("Composer torn down");
    }
}

impl Drop for Composer {
    fn drop(&mut self) {
        self.segment_uploads.cancel_all();
        self.attachments.cancel_all();
    }
}
