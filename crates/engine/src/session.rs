//! Per-file upload session state.
//!
//! One [`UploadSession`] owns the full lifecycle state for one file
//! identity: the fixed part plan, remote identifiers, the
//! uploaded/claimed/pending partition of parts, and the status machine.
//! All mutation goes through methods that take the inner lock briefly;
//! nothing holds it across an await point.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use roadhaul_protocol::{CompletedPart, SessionRecord, SessionStatus};

use crate::chunk::PartPlan;
use crate::progress::SpeedCalculator;
use crate::source::{FileSource, Fingerprint};
use crate::store::SessionStore;

pub struct UploadSession {
    source: FileSource,
    fingerprint: Fingerprint,
    context_id: String,
    pub(crate) speed: SpeedCalculator,
    inner: Mutex<SessionInner>,
    /// Cancellation handle for the current uploading run. Swapped for a
    /// fresh token on every resume; in-flight transfers hold clones of the
    /// old one and observe the cancel immediately.
    cancel: Mutex<CancellationToken>,
    /// Serializes scheduler runs so a resume issued while a previous run is
    /// still winding down cannot interleave two worker pools.
    pub(crate) run_guard: tokio::sync::Mutex<()>,
}

struct SessionInner {
    upload_id: Option<String>,
    key: Option<String>,
    plan: PartPlan,
    next_part: u32,
    uploaded: BTreeMap<u32, String>,
    claimed: HashSet<u32>,
    status: SessionStatus,
    paused_by_user: bool,
    message: String,
}

impl UploadSession {
    /// Creates a fresh session for a file with no persisted residue.
    pub(crate) fn new(source: FileSource, context_id: String, plan: PartPlan) -> Self {
        let fingerprint = source.fingerprint();
        Self {
            source,
            fingerprint,
            context_id,
            speed: SpeedCalculator::new(),
            inner: Mutex::new(SessionInner {
                upload_id: None,
                key: None,
                plan,
                next_part: 1,
                uploaded: BTreeMap::new(),
                claimed: HashSet::new(),
                status: SessionStatus::Idle,
                paused_by_user: false,
                message: "Ready to upload".into(),
            }),
            cancel: Mutex::new(CancellationToken::new()),
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Reconstructs a session from its persisted record.
    ///
    /// The part plan is taken from the record, never re-derived: a resumed
    /// session must keep the exact boundaries its parts were sliced with.
    pub(crate) fn from_record(
        source: FileSource,
        context_id: String,
        record: &SessionRecord,
    ) -> Self {
        let fingerprint = source.fingerprint();
        let plan = PartPlan::from_record(record.part_size, record.total_parts);
        let uploaded: BTreeMap<u32, String> = record
            .uploaded_parts
            .iter()
            .map(|p| (p.part_number, p.etag.clone()))
            .collect();
        // Cursor clamped to one past the last part; claims never survive a
        // restart.
        let next_part = record.next_part.clamp(1, record.total_parts + 1);
        let (status, message) = if record.status == SessionStatus::Paused {
            (SessionStatus::Paused, "Resumed from previous".to_string())
        } else {
            (SessionStatus::Idle, "Ready to upload".to_string())
        };
        Self {
            source,
            fingerprint,
            context_id,
            speed: SpeedCalculator::new(),
            inner: Mutex::new(SessionInner {
                upload_id: record.upload_id.clone(),
                key: record.key.clone(),
                plan,
                next_part,
                uploaded,
                claimed: HashSet::new(),
                status,
                // A reload never preserves a user pause; only the caller's
                // explicit pause during this process run does.
                paused_by_user: false,
                message,
            }),
            cancel: Mutex::new(CancellationToken::new()),
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn plan(&self) -> PartPlan {
        self.inner.lock().unwrap().plan
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().unwrap().status
    }

    pub fn message(&self) -> String {
        self.inner.lock().unwrap().message.clone()
    }

    pub fn paused_by_user(&self) -> bool {
        self.inner.lock().unwrap().paused_by_user
    }

    /// Remote identifiers, if initiation has happened.
    pub fn remote_ids(&self) -> Option<(String, String)> {
        let s = self.inner.lock().unwrap();
        match (&s.upload_id, &s.key) {
            (Some(id), Some(key)) => Some((id.clone(), key.clone())),
            _ => None,
        }
    }

    pub(crate) fn set_remote_ids(&self, upload_id: String, key: String) {
        let mut s = self.inner.lock().unwrap();
        s.upload_id = Some(upload_id);
        s.key = Some(key);
    }

    pub fn is_initiated(&self) -> bool {
        self.remote_ids().is_some()
    }

    pub fn total_parts(&self) -> u32 {
        self.inner.lock().unwrap().plan.total_parts
    }

    pub fn uploaded_count(&self) -> u32 {
        self.inner.lock().unwrap().uploaded.len() as u32
    }

    pub fn is_uploaded(&self, part_number: u32) -> bool {
        self.inner.lock().unwrap().uploaded.contains_key(&part_number)
    }

    /// Whole-percent progress.
    pub fn percent(&self) -> u8 {
        let s = self.inner.lock().unwrap();
        let total = s.plan.total_parts.max(1) as f64;
        ((s.uploaded.len() as f64 / total) * 100.0).round() as u8
    }

    /// Records a successfully uploaded part. Idempotent: returns `false`
    /// and mutates nothing if the part is already recorded.
    pub(crate) fn record_uploaded(&self, part_number: u32, etag: String) -> bool {
        let mut s = self.inner.lock().unwrap();
        if s.uploaded.contains_key(&part_number) {
            return false;
        }
        s.uploaded.insert(part_number, etag);
        // Keep uploaded and claimed disjoint.
        s.claimed.remove(&part_number);
        true
    }

    /// Claims the next eligible part for a worker.
    ///
    /// First pass scans forward from `next_part`, advancing the cursor past
    /// the claim. If the forward pass is exhausted, a wraparound pass over
    /// `[1, next_part)` picks up parts left pending by an aborted claim,
    /// without moving the cursor.
    pub(crate) fn claim_next(&self) -> Option<u32> {
        let mut s = self.inner.lock().unwrap();
        let total = s.plan.total_parts;
        for n in s.next_part..=total {
            if !s.uploaded.contains_key(&n) && !s.claimed.contains(&n) {
                s.claimed.insert(n);
                s.next_part = n + 1;
                return Some(n);
            }
        }
        let cursor = s.next_part.min(total + 1);
        for n in 1..cursor {
            if !s.uploaded.contains_key(&n) && !s.claimed.contains(&n) {
                s.claimed.insert(n);
                return Some(n);
            }
        }
        None
    }

    /// Releases a claim so another worker, or a later resume, may
    /// re-attempt the part.
    pub(crate) fn release_claim(&self, part_number: u32) {
        self.inner.lock().unwrap().claimed.remove(&part_number);
    }

    pub(crate) fn has_claims(&self) -> bool {
        !self.inner.lock().unwrap().claimed.is_empty()
    }

    /// Uploaded parts sorted ascending by part number, as the remote
    /// completion call requires.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        let s = self.inner.lock().unwrap();
        s.uploaded
            .iter()
            .map(|(&part_number, etag)| CompletedPart {
                part_number,
                etag: etag.clone(),
            })
            .collect()
    }

    // --- status machine -------------------------------------------------

    /// `Idle/Paused/Error → Uploading`. No-op on terminal sessions.
    pub(crate) fn mark_uploading(&self, message: &str) -> bool {
        let mut s = self.inner.lock().unwrap();
        if s.status.is_terminal() || s.status == SessionStatus::Finalizing {
            return false;
        }
        s.status = SessionStatus::Uploading;
        s.paused_by_user = false;
        s.message = message.into();
        true
    }

    /// `Uploading → Paused`. Returns `false` if the session was not
    /// uploading.
    pub(crate) fn mark_paused(&self, by_user: bool, message: &str) -> bool {
        let mut s = self.inner.lock().unwrap();
        if s.status != SessionStatus::Uploading {
            return false;
        }
        s.status = SessionStatus::Paused;
        s.paused_by_user = by_user;
        s.message = message.into();
        true
    }

    pub(crate) fn mark_finalizing(&self) -> bool {
        let mut s = self.inner.lock().unwrap();
        if s.status != SessionStatus::Uploading {
            return false;
        }
        s.status = SessionStatus::Finalizing;
        s.message = "Finalizing...".into();
        true
    }

    pub(crate) fn mark_completed(&self) {
        let mut s = self.inner.lock().unwrap();
        s.status = SessionStatus::Completed;
        s.message = "Upload complete".into();
    }

    pub(crate) fn mark_error(&self, message: String) {
        let mut s = self.inner.lock().unwrap();
        if s.status.is_terminal() {
            return;
        }
        s.status = SessionStatus::Error;
        s.message = message;
    }

    pub(crate) fn mark_aborted(&self) {
        let mut s = self.inner.lock().unwrap();
        s.status = SessionStatus::Aborted;
        s.message = "Upload aborted".into();
    }

    // --- cancellation ---------------------------------------------------

    /// Clone of the current run's cancellation token.
    pub(crate) fn run_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap().clone()
    }

    /// Cancels every in-flight transfer of the current run, immediately
    /// and non-gracefully.
    pub(crate) fn cancel_inflight(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Installs a fresh token for a new run and returns a clone of it.
    pub(crate) fn reset_run_token(&self) -> CancellationToken {
        let mut guard = self.cancel.lock().unwrap();
        *guard = CancellationToken::new();
        guard.clone()
    }

    // --- persistence ----------------------------------------------------

    /// Builds the durable snapshot of this session.
    pub fn snapshot(&self) -> SessionRecord {
        let s = self.inner.lock().unwrap();
        SessionRecord {
            upload_id: s.upload_id.clone(),
            key: s.key.clone(),
            part_size: s.plan.part_size,
            total_parts: s.plan.total_parts,
            next_part: s.next_part.min(s.plan.total_parts + 1),
            uploaded_parts: s
                .uploaded
                .iter()
                .map(|(&part_number, etag)| CompletedPart {
                    part_number,
                    etag: etag.clone(),
                })
                .collect(),
            status: s.status,
            updated_at: Utc::now(),
        }
    }

    /// Saves the session synchronously. Aborted sessions are never
    /// persisted: a cancelled remote upload must not resurrect on the
    /// next load. Store failures are logged, not fatal.
    pub(crate) fn persist(&self, store: &dyn SessionStore) {
        if self.status() == SessionStatus::Aborted {
            return;
        }
        let record = self.snapshot();
        if let Err(e) = store.save(&self.fingerprint, &record) {
            warn!(
                fingerprint = %self.fingerprint,
                error = %e,
                "failed to persist session record"
            );
        }
    }
}
