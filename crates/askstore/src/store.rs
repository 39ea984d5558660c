//! FileStore: filesystem-backed content-addressed storage.
//!
//! Layout:
//! ```text
//! {base_path}/
//! ├── objects/
//! │   └── ab/
//! │       └── cde123...        # object bytes
//! └── metadata/
//!     └── ab/
//!         └── cde123....json   # ObjectMeta
//! ```
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! reader never observes a half-written object.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

use crate::config::StoreConfig;
use crate::key::ObjectKey;
use crate::metadata::{ObjectMeta, StoredObject};

/// Storage backend for uploaded media.
pub trait MediaStore: Send + Sync {
    /// Store bytes, returning their key. Storing existing content is a no-op.
    fn put(&self, data: &[u8], meta: &ObjectMeta) -> Result<ObjectKey>;

    /// Read an object. `Ok(None)` when the key is unknown.
    fn get(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>>;

    fn contains(&self, key: &ObjectKey) -> bool;

    /// Metadata and location without reading the payload.
    fn describe(&self, key: &ObjectKey) -> Result<Option<StoredObject>>;
}

#[derive(Debug, Clone)]
pub struct FileStore {
    config: StoreConfig,
}

impl FileStore {
    /// Create the store, making its directories unless read-only.
    pub fn new(config: StoreConfig) -> Result<Self> {
        if !config.read_only {
            fs::create_dir_all(config.objects_dir())
                .context("failed to create store objects directory")?;
            fs::create_dir_all(config.metadata_dir())
                .context("failed to create store metadata directory")?;
        }

        Ok(Self { config })
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(StoreConfig::with_base_path(path))
    }

    pub fn read_only_at(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(StoreConfig::read_only(path))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn object_path(&self, key: &ObjectKey) -> PathBuf {
        self.config.objects_dir().join(key.shard()).join(key.leaf())
    }

    fn metadata_path(&self, key: &ObjectKey) -> PathBuf {
        self.config
            .metadata_dir()
            .join(key.shard())
            .join(format!("{}.json", key.leaf()))
    }

    /// Path of a stored object, if present.
    pub fn path(&self, key: &ObjectKey) -> Option<PathBuf> {
        let path = self.object_path(key);
        path.exists().then_some(path)
    }
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write via a temp file + rename so concurrent writers of the same key never interleave.
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().context("object path has no parent")?;
    fs::create_dir_all(parent).context("failed to create shard directory")?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("object path has no file name")?;
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = parent.join(format!(".{}.{}-{}.tmp", file_name, std::process::id(), seq));

    fs::write(&tmp, data).context("failed to write temporary object file")?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).context("failed to move object into place");
    }
    Ok(())
}

impl MediaStore for FileStore {
    fn put(&self, data: &[u8], meta: &ObjectMeta) -> Result<ObjectKey> {
        if self.config.read_only {
            anyhow::bail!("media store is in read-only mode");
        }

        let key = ObjectKey::for_bytes(data);
        let obj_path = self.object_path(&key);

        if !obj_path.exists() {
            write_atomically(&obj_path, data)?;
        }

        if self.config.write_metadata {
            let meta_path = self.metadata_path(&key);
            if !meta_path.exists() {
                let mut stored = meta.clone();
                stored.size = data.len() as u64;
                let json = serde_json::to_vec(&stored).context("failed to serialize metadata")?;
                write_atomically(&meta_path, &json)?;
            }
        }

        Ok(key)
    }

    fn get(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path).context("failed to read object file")?;
        Ok(Some(data))
    }

    fn contains(&self, key: &ObjectKey) -> bool {
        self.object_path(key).exists()
    }

    fn describe(&self, key: &ObjectKey) -> Result<Option<StoredObject>> {
        let obj_path = self.object_path(key);
        if !obj_path.exists() {
            return Ok(None);
        }

        let meta_path = self.metadata_path(key);
        let meta = if meta_path.exists() {
            let json = fs::read_to_string(&meta_path).context("failed to read metadata file")?;
            serde_json::from_str(&json).context("failed to parse metadata")?
        } else {
            let size = fs::metadata(&obj_path)
                .context("failed to stat object file")?
                .len();
            ObjectMeta {
                mime_type: "application/octet-stream".to_string(),
                size,
                original_name: None,
            }
        };

        Ok(Some(StoredObject {
            key: key.clone(),
            meta,
            local_path: Some(obj_path.to_string_lossy().to_string()),
        }))
    }
}
