//! Attachment queue: an `UploadQueue` guarded by file-count and size limits.
//!
//! Limits apply to the whole queue, including failed tasks still listed, and
//! a batch that would break any of them is rejected before anything from it is
//! enqueued.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use askconf::{LimitsConfig, UploadConfig};
use bytes::Bytes;

use super::{ItemKind, QueueError, TaskId, UploadMetadata, UploadQueue, UploadSubject, UploadTask, Uploader};

/// A user-selected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl AttachmentFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Read a file from disk, guessing its mime type from the extension.
    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read attachment {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("attachment path has no file name")?
            .to_string();

        Ok(Self::new(name, mime_for(path), bytes))
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("txt" | "log") => "text/plain",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Why a batch was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitViolation {
    #[error("{name} is {size} bytes; each attachment may be at most {limit} bytes")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("{attempted} attachments selected; at most {limit} are allowed")]
    TooManyFiles { attempted: usize, limit: usize },

    #[error("attachments would total {total} bytes; the combined limit is {limit} bytes")]
    AggregateTooLarge { total: u64, limit: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLimits {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
}

impl From<&LimitsConfig> for AttachmentLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_files: limits.max_attachments,
            max_file_bytes: limits.max_attachment_bytes,
            max_total_bytes: limits.max_total_attachment_bytes,
        }
    }
}

impl AttachmentLimits {
    /// Check a batch against what the queue already holds.
    pub fn check(
        &self,
        existing_files: usize,
        existing_bytes: u64,
        batch: &[AttachmentFile],
    ) -> Result<(), LimitViolation> {
        if let Some(file) = batch.iter().find(|f| f.size() > self.max_file_bytes) {
            return Err(LimitViolation::FileTooLarge {
                name: file.name.clone(),
                size: file.size(),
                limit: self.max_file_bytes,
            });
        }

        let attempted = existing_files + batch.len();
        if attempted > self.max_files {
            return Err(LimitViolation::TooManyFiles {
                attempted,
                limit: self.max_files,
            });
        }

        let total = existing_bytes + batch.iter().map(AttachmentFile::size).sum::<u64>();
        if total > self.max_total_bytes {
            return Err(LimitViolation::AggregateTooLarge {
                total,
                limit: self.max_total_bytes,
            });
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct AttachmentQueue {
    queue: UploadQueue,
    limits: AttachmentLimits,
    admission: Arc<Mutex<usize>>,
}

impl AttachmentQueue {
    pub fn new(uploader: Arc<dyn Uploader>, limits: AttachmentLimits, upload: &UploadConfig) -> Self {
        Self {
            queue: UploadQueue::new(ItemKind::Attachment, uploader, upload),
            limits,
            admission: Arc::new(Mutex::new(0)),
        }
    }

    pub fn limits(&self) -> AttachmentLimits {
        self.limits
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    /// Validate the whole batch, then enqueue every file. All or nothing.
    pub fn enqueue_batch(&self, files: Vec<AttachmentFile>) -> Result<Vec<TaskId>, QueueError> {
        // Serializes check-then-enqueue; holds the next order index.
        let mut next_order = self
            .admission
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Err(violation) = self
            .limits
            .check(self.queue.len(), self.queue.total_bytes(), &files)
        {
            tracing::warn!(
                batch.files = files.len(),
                error = %violation,
                "Attachment batch rejected"
            );
            return Err(violation.into());
        }

        let ids = files
            .into_iter()
            .map(|file| {
                let metadata = UploadMetadata {
                    subject: UploadSubject::Attachment {
                        file_name: file.name,
                    },
                    mime_type: file.mime_type,
                    size_bytes: file.bytes.len() as u64,
                    order: *next_order,
                };
                *next_order += 1;
                self.queue.enqueue(file.bytes, metadata)
            })
            .collect();

        Ok(ids)
    }

    pub fn remove(&self, id: TaskId) -> Result<UploadTask, QueueError> {
        self.queue.remove(id)
    }

    pub fn retry(&self, id: TaskId) -> Result<(), QueueError> {
        self.queue.retry(id)
    }

    pub fn get_successful(&self) -> Vec<UploadTask> {
        self.queue.get_successful()
    }

    pub fn is_busy(&self) -> bool {
        self.queue.is_busy()
    }

    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.queue.snapshot()
    }

    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    pub fn cancel_all(&self) {
        self.queue.cancel_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{StorageRef, UploadError, UploadStatus};
    use askconf::limits::MIB;
    use async_trait::async_trait;

    struct Accepting;

    #[async_trait]
    impl Uploader for Accepting {
        async fn upload(&self, payload: Bytes, _metadata: UploadMetadata) -> Result<StorageRef, UploadError> {
            Ok(StorageRef::new(format!("att-{}", payload.len())))
        }
    }

    fn file(name: &str, size: u64) -> AttachmentFile {
        AttachmentFile::new(name, "application/pdf", vec![0u8; size as usize])
    }

    fn attachments() -> AttachmentQueue {
        AttachmentQueue::new(
            Arc::new(Accepting),
            AttachmentLimits::from(&LimitsConfig::default()),
            &UploadConfig::default(),
        )
    }

    #[test]
    fn test_limits_per_file() {
        let limits = AttachmentLimits::from(&LimitsConfig::default());
        let err = limits
            .check(0, 0, &[file("big.pdf", 5 * MIB + 1)])
            .unwrap_err();
        assert!(matches!(err, LimitViolation::FileTooLarge { ref name, .. } if name == "big.pdf"));
        assert!(limits.check(0, 0, &[file("edge.pdf", 5 * MIB)]).is_ok());
    }

    #[test]
    fn test_limits_count_includes_existing() {
        let limits = AttachmentLimits::from(&LimitsConfig::default());
        let err = limits
            .check(2, 0, &[file("a", 1), file("b", 1)])
            .unwrap_err();
        assert_eq!(
            err,
            LimitViolation::TooManyFiles {
                attempted: 4,
                limit: 3
            }
        );
    }

    #[test]
    fn test_violation_messages_are_actionable() {
        let err = LimitViolation::AggregateTooLarge {
            total: 16,
            limit: 15,
        };
        assert_eq!(
            err.to_string(),
            "attachments would total 16 bytes; the combined limit is 15 bytes"
        );
    }

    #[tokio::test]
    async fn test_over_aggregate_batch_rejected_whole() {
        let q = attachments();
        q.enqueue_batch(vec![file("one.pdf", 4 * MIB), file("two.pdf", 4 * MIB)])
            .unwrap();

        let err = q
            .enqueue_batch(vec![file("three.pdf", 4 * MIB)])
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::Limit(LimitViolation::AggregateTooLarge { .. })
        ));
        assert_eq!(q.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_uploads_in_order() {
        let q = attachments();
        let ids = q
            .enqueue_batch(vec![file("a.pdf", 10), file("b.pdf", 20)])
            .unwrap();
        q.wait_idle().await;

        let done = q.get_successful();
        assert_eq!(done.iter().map(|t| t.id).collect::<Vec<_>>(), ids);
        assert!(done.iter().all(|t| t.status == UploadStatus::Succeeded));
        assert_eq!(done[1].result, Some(StorageRef::new("att-20")));
    }

    #[tokio::test]
    async fn test_removal_frees_room() {
        let q = attachments();
        let ids = q
            .enqueue_batch(vec![file("a", 1), file("b", 1), file("c", 1)])
            .unwrap();
        assert!(q.enqueue_batch(vec![file("d", 1)]).is_err());

        q.remove(ids[0]).unwrap();
        assert!(q.enqueue_batch(vec![file("d", 1)]).is_ok());
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(mime_for(Path::new("Report.PDF")), "application/pdf");
        assert_eq!(mime_for(Path::new("shot.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_from_path() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello")?;

        let file = AttachmentFile::from_path(&path).await?;
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.mime_type, "text/plain");
        assert_eq!(file.size(), 5);
        Ok(())
    }
}
