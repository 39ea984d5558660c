//! Sidecar metadata for stored objects.

use crate::key::ObjectKey;
use serde::{Deserialize, Serialize};

/// What the caller knows about an object when storing it.
///
/// Written as JSON next to the object so lookups never read the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    /// MIME type, e.g. "audio/wav", "video/webm", "application/pdf".
    pub mime_type: String,

    /// Size in bytes. Filled in by the store.
    #[serde(default)]
    pub size: u64,

    /// File name as the user saw it, for attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

impl ObjectMeta {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            size: 0,
            original_name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }
}

/// A stored object as returned by `describe()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: ObjectKey,
    pub meta: ObjectMeta,

    /// Local path of the object file, when the store is filesystem-backed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}
