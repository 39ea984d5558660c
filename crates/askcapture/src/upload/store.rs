use std::path::Path;
use std::sync::Arc;

use askstore::{FileStore, MediaStore, ObjectMeta};
use async_trait::async_trait;
use bytes::Bytes;

use super::{StorageRef, UploadError, UploadMetadata, UploadSubject, Uploader};

/// Uploads into a content-addressed `MediaStore`. The returned reference is
/// the object key, so identical payloads share one reference.
#[derive(Clone)]
pub struct StoreUploader {
    store: Arc<dyn MediaStore>,
}

impl StoreUploader {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }

    /// Open (creating if needed) a `FileStore` rooted at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(FileStore::at_path(path)?)))
    }

    pub fn store(&self) -> &Arc<dyn MediaStore> {
        &self.store
    }
}

#[async_trait]
impl Uploader for StoreUploader {
    async fn upload(&self, payload: Bytes, metadata: UploadMetadata) -> Result<StorageRef, UploadError> {
        let mut meta = ObjectMeta::new(metadata.mime_type);
        if let UploadSubject::Attachment { file_name } = metadata.subject {
            meta = meta.named(file_name);
        }

        let store = Arc::clone(&self.store);
        let key = tokio::task::spawn_blocking(move || store.put(&payload, &meta))
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?
            .map_err(|e| UploadError::Transport(format!("{:#}", e)))?;

        Ok(StorageRef::new(key.into_string()))
    }
}
