//! Upload queue: one spawned transfer per task, tracked by id.
//!
//! Tasks run concurrently up to `max_concurrent`; each attempt is bounded by
//! the configured timeout. A failure only ever touches its own task. Removing
//! a task aborts its transfer on a best-effort basis, and a result arriving
//! for a removed task is dropped.

use std::sync::Arc;
use std::time::Duration;

use askconf::UploadConfig;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, Notify, Semaphore};
use tokio::task::JoinHandle;

use super::{
    ItemKind, QueueError, StorageRef, TaskId, UploadError, UploadMetadata, UploadStatus,
    UploadTask, Uploader,
};

/// Queue activity, for renderers that prefer pushes over polling.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Queued { id: TaskId },
    Started { id: TaskId, attempt: u32 },
    Succeeded { id: TaskId, reference: StorageRef },
    Failed { id: TaskId, error: String },
    Removed { id: TaskId },
}

struct Entry {
    task: UploadTask,
    payload: Bytes,
    metadata: UploadMetadata,
    handle: Option<JoinHandle<()>>,
}

struct QueueInner {
    kind: ItemKind,
    uploader: Arc<dyn Uploader>,
    entries: DashMap<TaskId, Entry>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    events: broadcast::Sender<UploadEvent>,
    settled: Notify,
}

#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<QueueInner>,
}

impl UploadQueue {
    pub fn new(kind: ItemKind, uploader: Arc<dyn Uploader>, config: &UploadConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(QueueInner {
                kind,
                uploader,
                entries: DashMap::new(),
                permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                timeout: Duration::from_secs(config.timeout_secs),
                events,
                settled: Notify::new(),
            }),
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.inner.kind
    }

    /// Create a pending task and start its transfer. Never blocks on the upload.
    pub fn enqueue(&self, payload: Bytes, metadata: UploadMetadata) -> TaskId {
        let id = TaskId::new();
        let task = UploadTask::new(id, &metadata);

        tracing::info!(
            task.id = %id,
            task.kind = ?self.inner.kind,
            task.size_bytes = metadata.size_bytes,
            "Upload queued"
        );

        self.inner.entries.insert(
            id,
            Entry {
                task,
                payload,
                metadata,
                handle: None,
            },
        );
        self.emit(UploadEvent::Queued { id });
        self.spawn(id);
        id
    }

    /// Re-run a failed task under the same id with the same payload.
    pub fn retry(&self, id: TaskId) -> Result<(), QueueError> {
        {
            let mut entry = self
                .inner
                .entries
                .get_mut(&id)
                .ok_or(QueueError::TaskNotFound(id))?;

            if entry.task.status != UploadStatus::Failed {
                return Err(QueueError::NotFailed {
                    id,
                    status: entry.task.status,
                });
            }
            entry.task.mark_pending();

            tracing::info!(
                task.id = %id,
                task.attempts = entry.task.attempts,
                "Upload retried"
            );
        }

        self.emit(UploadEvent::Queued { id });
        self.spawn(id);
        Ok(())
    }

    /// Delete a task, aborting its transfer if one is running.
    pub fn remove(&self, id: TaskId) -> Result<UploadTask, QueueError> {
        let (_, entry) = self
            .inner
            .entries
            .remove(&id)
            .ok_or(QueueError::TaskNotFound(id))?;

        if let Some(handle) = entry.handle {
            handle.abort();
        }

        tracing::info!(
            task.id = %id,
            task.status = ?entry.task.status,
            "Upload removed"
        );

        self.emit(UploadEvent::Removed { id });
        self.inner.settled.notify_waiters();
        Ok(entry.task)
    }

    /// Update ordering metadata only; status and result are untouched.
    pub fn set_order(&self, id: TaskId, order: usize) -> Result<(), QueueError> {
        let mut entry = self
            .inner
            .entries
            .get_mut(&id)
            .ok_or(QueueError::TaskNotFound(id))?;
        entry.task.order = order;
        entry.metadata.order = order;
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Option<UploadTask> {
        self.inner.entries.get(&id).map(|e| e.task.clone())
    }

    /// The payload a task uploads (and re-uploads on retry).
    pub fn payload(&self, id: TaskId) -> Option<Bytes> {
        self.inner.entries.get(&id).map(|e| e.payload.clone())
    }

    /// Every task, ordered.
    pub fn snapshot(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<UploadTask> = self
            .inner
            .entries
            .iter()
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by_key(|t| t.order);
        tasks
    }

    /// Succeeded tasks, ordered.
    pub fn get_successful(&self) -> Vec<UploadTask> {
        let mut tasks = self.snapshot();
        tasks.retain(|t| t.status == UploadStatus::Succeeded);
        tasks
    }

    pub fn is_busy(&self) -> bool {
        self.inner.entries.iter().any(|e| e.task.status.in_flight())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Total bytes across every task in the queue, whatever its status.
    pub fn total_bytes(&self) -> u64 {
        self.inner.entries.iter().map(|e| e.task.size_bytes).sum()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve once no task is pending or uploading.
    pub async fn wait_idle(&self) {
        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            if !self.is_busy() {
                return;
            }
            settled.await;
        }
    }

    /// Abort and delete every task.
    pub fn cancel_all(&self) {
        let ids: Vec<TaskId> = self.inner.entries.iter().map(|e| *e.key()).collect();
        for id in ids {
            let _ = self.remove(id);
        }
    }

    fn emit(&self, event: UploadEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn spawn(&self, id: TaskId) {
        let queue = self.clone();
        let handle = tokio::spawn(async move { queue.run(id).await });

        match self.inner.entries.get_mut(&id) {
            Some(mut entry) => entry.handle = Some(handle),
            None => handle.abort(),
        }
    }

    async fn run(&self, id: TaskId) {
        let Ok(_permit) = Arc::clone(&self.inner.permits).acquire_owned().await else {
            return;
        };

        let (payload, metadata, attempt) = {
            let Some(mut entry) = self.inner.entries.get_mut(&id) else {
                return;
            };
            entry.task.mark_uploading();
            (
                entry.payload.clone(),
                entry.metadata.clone(),
                entry.task.attempts,
            )
        };

        tracing::info!(task.id = %id, task.attempt = attempt, "Upload started");
        self.emit(UploadEvent::Started { id, attempt });

        let result = match tokio::time::timeout(
            self.inner.timeout,
            self.inner.uploader.upload(payload, metadata),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UploadError::TimedOut(self.inner.timeout.as_secs())),
        };

        let event = {
            let Some(mut entry) = self.inner.entries.get_mut(&id) else {
                tracing::debug!(task.id = %id, "Upload finished after removal, result dropped");
                return;
            };
            entry.handle = None;

            match result {
                Ok(reference) => {
                    tracing::info!(
                        task.id = %id,
                        task.attempt = attempt,
                        task.reference = %reference,
                        "Upload succeeded"
                    );
                    entry.task.mark_succeeded(reference.clone());
                    UploadEvent::Succeeded { id, reference }
                }
                Err(err) => {
                    tracing::error!(
                        task.id = %id,
                        task.attempt = attempt,
                        task.error = %err,
                        "Upload failed"
                    );
                    let error = err.to_string();
                    entry.task.mark_failed(error.clone());
                    UploadEvent::Failed { id, error }
                }
            }
        };

        self.emit(event);
        self.inner.settled.notify_waiters();
    }
}
