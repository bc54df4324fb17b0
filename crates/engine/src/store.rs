//! Durable session persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use roadhaul_protocol::SessionRecord;

use crate::error::EngineError;
use crate::source::Fingerprint;

/// Durable mapping from file fingerprint to upload progress.
///
/// `save` is called synchronously after every state change that must
/// survive a crash; implementations must be idempotent and last-write-wins.
pub trait SessionStore: Send + Sync {
    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<SessionRecord>, EngineError>;
    fn save(&self, fingerprint: &Fingerprint, record: &SessionRecord) -> Result<(), EngineError>;
    fn clear(&self, fingerprint: &Fingerprint) -> Result<(), EngineError>;
}

/// In-memory store for tests and embedders with their own persistence.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<SessionRecord>, EngineError> {
        Ok(self
            .records
            .read()
            .unwrap()
            .get(fingerprint.digest())
            .cloned())
    }

    fn save(&self, fingerprint: &Fingerprint, record: &SessionRecord) -> Result<(), EngineError> {
        self.records
            .write()
            .unwrap()
            .insert(fingerprint.digest().to_string(), record.clone());
        Ok(())
    }

    fn clear(&self, fingerprint: &Fingerprint) -> Result<(), EngineError> {
        self.records.write().unwrap().remove(fingerprint.digest());
        Ok(())
    }
}

/// File-backed store: one JSON map on disk, cached in memory, rewritten on
/// every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl JsonFileStore {
    /// Opens a store at `path`, loading existing records from disk.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let records = load_records(&path)?;
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Writes the current records to disk.
    fn persist(&self) -> Result<(), EngineError> {
        let map = self.records.read().unwrap();
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted {} session record(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

impl SessionStore for JsonFileStore {
    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<SessionRecord>, EngineError> {
        Ok(self
            .records
            .read()
            .unwrap()
            .get(fingerprint.digest())
            .cloned())
    }

    fn save(&self, fingerprint: &Fingerprint, record: &SessionRecord) -> Result<(), EngineError> {
        {
            let mut map = self.records.write().unwrap();
            map.insert(fingerprint.digest().to_string(), record.clone());
        }
        self.persist()
    }

    fn clear(&self, fingerprint: &Fingerprint) -> Result<(), EngineError> {
        {
            let mut map = self.records.write().unwrap();
            map.remove(fingerprint.digest());
        }
        self.persist()
    }
}

/// Loads records from a JSON file on disk.
fn load_records(path: &Path) -> Result<HashMap<String, SessionRecord>, EngineError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let records: HashMap<String, SessionRecord> = serde_json::from_str(&data)?;
    debug!("loaded {} session record(s) from {:?}", records.len(), path);
    Ok(records)
}
