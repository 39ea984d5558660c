//! Background upload pipeline.
//!
//! Every accepted segment and attachment becomes one `UploadTask`, spawned the
//! moment it is enqueued. The composer never waits on a transfer: it reads task
//! status for rendering and collects `get_successful()` when assembling.

mod attachments;
mod queue;
mod store;

pub use attachments::{AttachmentFile, AttachmentLimits, AttachmentQueue, LimitViolation};
pub use queue::{UploadEvent, UploadQueue};
pub use store::StoreUploader;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::segment::SegmentId;
use crate::stream::CaptureMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Succeeded,
    Failed,
}

impl UploadStatus {
    /// Pending or uploading.
    pub fn in_flight(self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Uploading)
    }
}

/// Opaque reference returned by the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageRef(String);

impl StorageRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Segment,
    Attachment,
}

/// What is being uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UploadSubject {
    Segment {
        segment_id: SegmentId,
        mode: CaptureMode,
        duration_secs: u32,
    },
    Attachment {
        file_name: String,
    },
}

impl UploadSubject {
    pub fn kind(&self) -> ItemKind {
        match self {
            UploadSubject::Segment { .. } => ItemKind::Segment,
            UploadSubject::Attachment { .. } => ItemKind::Attachment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadMetadata {
    #[serde(flatten)]
    pub subject: UploadSubject,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Position among the queue's items; only ordering, never identity.
    pub order: usize,
}

/// Status record for one uploaded item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadTask {
    pub id: TaskId,
    pub kind: ItemKind,
    pub status: UploadStatus,
    pub attempts: u32,
    pub order: usize,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StorageRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadTask {
    fn new(id: TaskId, metadata: &UploadMetadata) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: metadata.subject.kind(),
            status: UploadStatus::Pending,
            attempts: 0,
            order: metadata.order,
            size_bytes: metadata.size_bytes,
            last_error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn mark_uploading(&mut self) {
        self.status = UploadStatus::Uploading;
        self.attempts += 1;
        self.updated_at = Utc::now();
    }

    fn mark_succeeded(&mut self, reference: StorageRef) {
        self.status = UploadStatus::Succeeded;
        self.result = Some(reference);
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    fn mark_failed(&mut self, error: String) {
        self.status = UploadStatus::Failed;
        self.last_error = Some(error);
        self.updated_at = Utc::now();
    }

    fn mark_pending(&mut self) {
        self.status = UploadStatus::Pending;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    /// Seconds since the task was first queued.
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("Upload rejected: {0}")]
    Rejected(String),

    #[error("Upload failed: {0}")]
    Transport(String),

    #[error("Upload timed out after {0}s")]
    TimedOut(u64),
}

/// Storage backend the queues transfer to.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, payload: Bytes, metadata: UploadMetadata) -> Result<StorageRef, UploadError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Upload task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Upload task {id} is {status:?}; only failed uploads can be retried")]
    NotFailed { id: TaskId, status: UploadStatus },

    #[error(transparent)]
    Limit(#[from] LimitViolation),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serializes_flat() {
        let metadata = UploadMetadata {
            subject: UploadSubject::Attachment {
                file_name: "notes.pdf".to_string(),
            },
            mime_type: "application/pdf".to_string(),
            size_bytes: 10,
            order: 1,
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["kind"], "attachment");
        assert_eq!(json["file_name"], "notes.pdf");
        assert_eq!(json["order"], 1);
    }

    #[test]
    fn test_task_lifecycle_fields() {
        let metadata = UploadMetadata {
            subject: UploadSubject::Attachment {
                file_name: "a.txt".to_string(),
            },
            mime_type: "text/plain".to_string(),
            size_bytes: 3,
            order: 0,
        };
        let mut task = UploadTask::new(TaskId::new(), &metadata);
        assert_eq!(task.kind, ItemKind::Attachment);
        assert!(task.status.in_flight());

        task.mark_uploading();
        task.mark_failed("boom".to_string());
        assert_eq!(task.attempts, 1);
        assert_eq!(task.last_error.as_deref(), Some("boom"));

        task.mark_pending();
        task.mark_uploading();
        task.mark_succeeded(StorageRef::new("ref-1"));
        assert_eq!(task.attempts, 2);
        assert!(task.last_error.is_none());
        assert_eq!(task.result, Some(StorageRef::new("ref-1")));
        assert!(task.age_secs() >= 0);
    }
}
