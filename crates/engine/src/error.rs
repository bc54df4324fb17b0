//! Engine error types.

/// Errors produced by the upload engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transient remote failure (HTTP status, network error). Retried per
    /// part up to the configured budget.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("network offline")]
    Offline,

    #[error("upload not initiated")]
    NotInitiated,

    #[error("no session for fingerprint: {0}")]
    NoSession(String),

    /// A part exhausted its retry budget.
    #[error("part {part_number} failed after {attempts} attempts: {message}")]
    PartFailed {
        part_number: u32,
        attempts: u32,
        message: String,
    },

    #[error("completion failed: {0}")]
    CompleteFailed(String),

    #[error("cancelled")]
    Cancelled,
}
