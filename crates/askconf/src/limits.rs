//! Product limits and upload policy.

use serde::{Deserialize, Serialize};

/// One mebibyte, the unit the attachment limits are expressed in.
pub const MIB: u64 = 1024 * 1024;

/// Limits surfaced to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Combined duration ceiling for all accepted segments, in seconds.
    pub total_budget_secs: u32,

    /// Maximum number of accepted recording segments.
    pub max_segments: usize,

    /// Maximum number of attachments.
    pub max_attachments: usize,

    /// Per-attachment size ceiling.
    pub max_attachment_bytes: u64,

    /// Aggregate size ceiling across every attachment in the queue.
    pub max_total_attachment_bytes: u64,

    /// Minimum title length (characters, after trimming).
    pub min_title_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            total_budget_secs: 90,
            max_segments: 3,
            max_attachments: 3,
            max_attachment_bytes: 5 * MIB,
            max_total_attachment_bytes: 15 * MIB,
            min_title_chars: 5,
        }
    }
}

/// Background upload behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Transfers allowed in flight at once, per queue.
    pub max_concurrent: usize,

    /// Per-attempt timeout; an attempt that exceeds it is marked failed.
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout_secs: 120,
        }
    }
}
