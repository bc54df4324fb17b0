use serde::{Deserialize, Serialize};

/// Lifecycle state of one upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Attached, initiated, not transferring.
    #[serde(rename = "idle")]
    Idle,
    /// Part transfers are scheduled or in flight.
    #[serde(rename = "uploading")]
    Uploading,
    /// Suspended by the user or by connectivity loss.
    #[serde(rename = "paused")]
    Paused,
    /// All parts uploaded, remote completion call in progress.
    #[serde(rename = "finalizing")]
    Finalizing,
    /// Remote completion succeeded. Terminal.
    #[serde(rename = "completed")]
    Completed,
    /// A part exhausted its retries, or initiation/completion failed.
    /// Recoverable via resume.
    #[serde(rename = "error")]
    Error,
    /// Explicitly cancelled. Terminal.
    #[serde(rename = "aborted")]
    Aborted,
}

impl SessionStatus {
    /// Returns `true` for states the session can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }
}

/// One successfully uploaded part, as the backend expects it at completion.
///
/// Field names follow the S3 multipart contract (`PartNumber` / `ETag`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Remote identifiers assigned when a multipart upload is initiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateOutcome {
    pub upload_id: String,
    pub key: String,
}

/// Time-limited destination for writing exactly one part's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartTarget {
    pub write_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_part_uses_s3_field_names() {
        let part = CompletedPart {
            part_number: 7,
            etag: "abc123".into(),
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["PartNumber"], 7);
        assert_eq!(json["ETag"], "abc123");
    }

    #[test]
    fn status_terminal_states() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert!(!SessionStatus::Error.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
        assert!(!SessionStatus::Uploading.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Uploading).unwrap();
        assert_eq!(json, "\"uploading\"");
        let back: SessionStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(back, SessionStatus::Paused);
    }
}
