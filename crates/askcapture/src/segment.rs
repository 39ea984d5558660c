//! Accepted recording segments and the duration budget derived from them.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::SegmentDraft;
use crate::preview::PreviewHandle;
use crate::stream::CaptureMode;
use crate::upload::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(Uuid);

impl SegmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A recording the user kept. Owns its payload and preview; the upload queue
/// holds a cheap clone of the payload under `upload`.
#[derive(Debug)]
pub struct Segment {
    pub id: SegmentId,
    pub mode: CaptureMode,
    pub payload: Bytes,
    pub mime_type: String,
    pub duration_secs: u32,
    pub preview: PreviewHandle,
    pub upload: TaskId,
}

impl Segment {
    pub fn new(id: SegmentId, draft: SegmentDraft, upload: TaskId) -> Self {
        Self {
            id,
            mode: draft.mode,
            payload: draft.payload,
            mime_type: draft.mime_type,
            duration_secs: draft.duration_secs,
            preview: draft.preview,
            upload,
        }
    }
}

/// Seconds used by the given segments.
pub fn used_secs(segments: &[Segment]) -> u32 {
    segments.iter().map(|s| s.duration_secs).sum()
}

/// Seconds left in `budget_secs` after the given segments.
pub fn remaining_secs(budget_secs: u32, segments: &[Segment]) -> u32 {
    budget_secs.saturating_sub(used_secs(segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::PreviewStore;

    fn segment(previews: &PreviewStore, duration_secs: u32) -> Segment {
        let payload = Bytes::from_static(b"RIFF");
        let draft = SegmentDraft {
            mode: CaptureMode::Audio,
            preview: previews.create(&payload, "audio/wav"),
            payload,
            mime_type: "audio/wav".to_string(),
            duration_secs,
        };
        Segment::new(SegmentId::new(), draft, TaskId::new())
    }

    #[test]
    fn test_remaining_is_derived() {
        let previews = PreviewStore::new();
        let mut segments = vec![segment(&previews, 30), segment(&previews, 45)];
        assert_eq!(used_secs(&segments), 75);
        assert_eq!(remaining_secs(90, &segments), 15);

        segments.remove(0);
        assert_eq!(remaining_secs(90, &segments), 45);
        assert_eq!(previews.revoked_count(), 1);
    }

    #[test]
    fn test_remaining_saturates() {
        let previews = PreviewStore::new();
        let segments = vec![segment(&previews, 60), segment(&previews, 60)];
        assert_eq!(remaining_secs(90, &segments), 0);
    }
}
