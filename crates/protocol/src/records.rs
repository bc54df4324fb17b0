use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CompletedPart, SessionStatus};

/// Durable snapshot of one upload session, keyed by file fingerprint.
///
/// This is the only state that survives a restart. It must reconstruct a
/// live session with no data loss: remote identifiers, the fixed part plan,
/// the scan cursor, and every part already acknowledged by the backend.
/// Claims and in-flight bookkeeping are deliberately absent; they are
/// meaningless after a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub part_size: u64,
    pub total_parts: u32,
    pub next_part: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploaded_parts: Vec<CompletedPart>,
    pub status: SessionStatus,
    pub updated_at: DateTime<Utc>,
}
