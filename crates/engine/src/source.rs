//! Source file identity.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// A local file queued for upload, with the attributes that identify it
/// across restarts.
#[derive(Debug, Clone)]
pub struct FileSource {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    /// Last-modified time, epoch milliseconds.
    pub modified_ms: i64,
    /// Sent as Content-Type on each part write.
    pub content_type: String,
}

impl FileSource {
    /// Builds a source from a path on disk, reading size and mtime from
    /// filesystem metadata.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let meta = std::fs::metadata(&path)?;
        let modified_ms = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path,
            name,
            size: meta.len(),
            modified_ms,
            content_type: "application/octet-stream".into(),
        })
    }

    /// Sets the Content-Type used for part writes.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Derives the stable identity for this file.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.name, self.size, self.modified_ms)
    }
}

/// Stable identity of a file across reloads: name, byte size, and
/// last-modified time.
///
/// Known weakness, kept by design: two distinct files that agree on all
/// three attributes are indistinguishable and will share (and corrupt) one
/// persisted session. The engine does not hash file content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    display: String,
    digest: String,
}

impl Fingerprint {
    pub fn new(name: &str, size: u64, modified_ms: i64) -> Self {
        let display = format!("{name}-{size}-{modified_ms}");
        let mut hasher = Sha256::new();
        hasher.update(display.as_bytes());
        Self {
            digest: hex::encode(hasher.finalize()),
            display,
        }
    }

    /// Human-readable `name-size-mtime` form.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Storage-safe key: SHA-256 hex of the display form.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display)
    }
}

/// Helper for tests and embedders that already know the file attributes.
pub fn source_for_path(path: &Path, content_type: &str) -> Result<FileSource, EngineError> {
    Ok(FileSource::from_path(path)?.with_content_type(content_type))
}
