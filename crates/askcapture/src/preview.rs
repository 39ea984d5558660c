//! Local playback handles for recorded segments.
//!
//! A preview keeps the recorded bytes addressable for playback until it is
//! revoked. `PreviewHandle` is deliberately not `Clone`: revoking consumes it,
//! and dropping an unrevoked handle revokes it, so each preview is released
//! exactly once.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

struct PreviewEntry {
    payload: Bytes,
    mime_type: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Registry {
    entries: DashMap<Uuid, PreviewEntry>,
    created: AtomicUsize,
    revoked: AtomicUsize,
}

/// Registry of live previews.
#[derive(Clone, Default)]
pub struct PreviewStore {
    inner: Arc<Registry>,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, payload: &Bytes, mime_type: &str) -> PreviewHandle {
        let id = Uuid::new_v4();
        self.inner.entries.insert(
            id,
            PreviewEntry {
                payload: payload.clone(),
                mime_type: mime_type.to_string(),
                created_at: Utc::now(),
            },
        );
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        debug!(preview.id = %id, bytes = payload.len(), "Preview created");

        PreviewHandle {
            id,
            store: self.clone(),
            revoked: false,
        }
    }

    /// Payload and mime type behind a preview URL, if still live.
    pub fn resolve(&self, url: &str) -> Option<(Bytes, String)> {
        let id = url.strip_prefix(PreviewHandle::SCHEME)?.parse::<Uuid>().ok()?;
        self.inner
            .entries
            .get(&id)
            .map(|e| (e.payload.clone(), e.mime_type.clone()))
    }

    pub fn created_at(&self, id: Uuid) -> Option<DateTime<Utc>> {
        self.inner.entries.get(&id).map(|e| e.created_at)
    }

    pub fn live_count(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn created_count(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn revoked_count(&self) -> usize {
        self.inner.revoked.load(Ordering::SeqCst)
    }

    fn release(&self, id: Uuid) {
        if self.inner.entries.remove(&id).is_some() {
            self.inner.revoked.fetch_add(1, Ordering::SeqCst);
            debug!(preview.id = %id, "Preview revoked");
        }
    }
}

pub struct PreviewHandle {
    id: Uuid,
    store: PreviewStore,
    revoked: bool,
}

impl PreviewHandle {
    const SCHEME: &'static str = "preview://";

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> String {
        format!("{}{}", Self::SCHEME, self.id)
    }

    pub fn revoke(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.revoked {
            self.revoked = true;
            self.store.release(self.id);
        }
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewHandle").field("id", &self.id).finish()
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_releases_once() {
        let store = PreviewStore::new();
        let handle = store.create(&Bytes::from_static(b"wav"), "audio/wav");
        assert_eq!(store.live_count(), 1);

        handle.revoke();
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.revoked_count(), 1);
    }

    #[test]
    fn test_drop_revokes() {
        let store = PreviewStore::new();
        {
            let _handle = store.create(&Bytes::from_static(b"wav"), "audio/wav");
        }
        assert_eq!(store.revoked_count(), 1);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_resolve_by_url() {
        let store = PreviewStore::new();
        let handle = store.create(&Bytes::from_static(b"clip"), "video/webm");
        let url = handle.url();

        let (payload, mime) = store.resolve(&url).expect("live preview");
        assert_eq!(&payload[..], b"clip");
        assert_eq!(mime, "video/webm");
        assert!(store.created_at(handle.id()).is_some());

        handle.revoke();
        assert!(store.resolve(&url).is_none());
        assert!(store.resolve("https://elsewhere").is_none());
    }
}
