//! Engine facade: session registry, lifecycle API, and the run loop.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use roadhaul_protocol::SessionStatus;

use crate::admission::AdmissionController;
use crate::chunk::PartPlan;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::TransferExecutor;
use crate::progress::UploadEvent;
use crate::reachability::ReachabilityMonitor;
use crate::remote::StorageCoordinator;
use crate::scheduler::PartScheduler;
use crate::session::UploadSession;
use crate::source::{FileSource, Fingerprint};
use crate::store::SessionStore;

/// Buffered progress events before the stream starts dropping.
const EVENT_BUFFER_SIZE: usize = 256;

/// The resumable multipart upload engine.
///
/// Owns every active [`UploadSession`], the global admission budget, and
/// the reachability watcher. One instance per process; sessions are keyed
/// by file fingerprint. Must be created on a Tokio runtime.
pub struct UploadEngine {
    shared: Arc<EngineShared>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

pub(crate) struct EngineShared {
    config: EngineConfig,
    remote: Arc<dyn StorageCoordinator>,
    store: Arc<dyn SessionStore>,
    executor: Arc<TransferExecutor>,
    scheduler: PartScheduler,
    reachability: ReachabilityMonitor,
    /// Explicit session registry. Besides the admission semaphore this is
    /// the only state shared across sessions.
    sessions: RwLock<HashMap<String, Arc<UploadSession>>>,
    events_tx: mpsc::Sender<UploadEvent>,
}

impl UploadEngine {
    /// Creates an engine over a remote coordinator and a session store.
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn StorageCoordinator>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let reachability = ReachabilityMonitor::new(true);
        let admission = Arc::new(AdmissionController::new(config.global_max_concurrent));

        let executor = Arc::new(TransferExecutor {
            remote: Arc::clone(&remote),
            admission,
            store: Arc::clone(&store),
            reachability: reachability.clone(),
            retry: config.retry.clone(),
            events: events_tx.clone(),
        });

        let shared = Arc::new(EngineShared {
            scheduler: PartScheduler::new(config.session_concurrency),
            config,
            remote,
            store,
            executor,
            reachability: reachability.clone(),
            sessions: RwLock::new(HashMap::new()),
            events_tx,
        });

        tokio::spawn(reachability_loop(
            Arc::downgrade(&shared),
            reachability.subscribe(),
        ));

        Self {
            shared,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the progress event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Connectivity handle for platform glue.
    pub fn reachability(&self) -> ReachabilityMonitor {
        self.shared.reachability.clone()
    }

    /// Loads or creates the session for a file and registers it. Does not
    /// start transferring.
    ///
    /// If the file has no remote upload yet, one is initiated here; a
    /// failed initiation parks the session in `Error` (it is retried on
    /// `start`/`resume`) and still returns the fingerprint.
    pub async fn attach(
        &self,
        source: FileSource,
        context_id: impl Into<String>,
    ) -> Result<Fingerprint, EngineError> {
        attach_session(&self.shared, source, context_id.into()).await
    }

    /// Begins (or continues) transferring. Requires connectivity.
    pub async fn start(&self, fingerprint: &Fingerprint) -> Result<(), EngineError> {
        let session = self.shared.get(fingerprint)?;
        launch(&self.shared, &session).await
    }

    /// Resumes a paused or errored session. Requires connectivity.
    pub async fn resume(&self, fingerprint: &Fingerprint) -> Result<(), EngineError> {
        let session = self.shared.get(fingerprint)?;
        launch(&self.shared, &session).await
    }

    /// Pauses an uploading session, cancelling its in-flight transfers
    /// immediately. No-op unless the session is uploading.
    pub fn pause(&self, fingerprint: &Fingerprint) -> Result<(), EngineError> {
        let session = self.shared.get(fingerprint)?;
        self.shared.pause_session(&session, true);
        Ok(())
    }

    /// Aborts a session: cancels in-flight transfers, deletes the
    /// persisted record unconditionally, and best-effort notifies the
    /// backend. No-op on terminal sessions.
    pub async fn abort(&self, fingerprint: &Fingerprint) -> Result<(), EngineError> {
        let session = self.shared.get(fingerprint)?;
        self.shared.abort_session(&session).await;
        Ok(())
    }

    /// Looks up a registered session.
    pub fn session(&self, fingerprint: &Fingerprint) -> Option<Arc<UploadSession>> {
        self.shared
            .sessions
            .read()
            .unwrap()
            .get(fingerprint.digest())
            .cloned()
    }
}

impl EngineShared {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Arc<UploadSession>, EngineError> {
        self.sessions
            .read()
            .unwrap()
            .get(fingerprint.digest())
            .cloned()
            .ok_or_else(|| EngineError::NoSession(fingerprint.display().to_string()))
    }

    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!("dropping upload event: {e}");
        }
    }

    /// Initiates the remote upload if the session has no identifiers yet.
    async fn ensure_initiated(&self, session: &Arc<UploadSession>) -> Result<(), EngineError> {
        if session.is_initiated() {
            return Ok(());
        }
        match self.remote.initiate(&session.source().name).await {
            Ok(outcome) => {
                info!(
                    fingerprint = %session.fingerprint(),
                    upload_id = %outcome.upload_id,
                    key = %outcome.key,
                    "multipart upload initiated"
                );
                session.set_remote_ids(outcome.upload_id, outcome.key);
                session.persist(self.store.as_ref());
                Ok(())
            }
            Err(e) => {
                session.mark_error(format!("Failed to initiate upload: {e}"));
                session.persist(self.store.as_ref());
                self.emit(UploadEvent::Failed {
                    fingerprint: session.fingerprint().display().to_string(),
                    error: session.message(),
                });
                Err(e)
            }
        }
    }

    fn pause_session(&self, session: &Arc<UploadSession>, by_user: bool) {
        let message = if by_user {
            "Paused"
        } else {
            "Network offline — auto-paused"
        };
        if session.mark_paused(by_user, message) {
            session.cancel_inflight();
            session.persist(self.store.as_ref());
            info!(fingerprint = %session.fingerprint(), by_user, "session paused");
            self.executor.emit_progress(session);
        }
    }

    async fn abort_session(&self, session: &Arc<UploadSession>) {
        if session.status().is_terminal() {
            return;
        }
        session.cancel_inflight();
        session.mark_aborted();

        // Local cleanup is unconditional and happens before the remote
        // call: a failed remote abort must not resurrect the session.
        if let Err(e) = self.store.clear(session.fingerprint()) {
            warn!(fingerprint = %session.fingerprint(), error = %e, "failed to clear session record");
        }

        if let Some((upload_id, key)) = session.remote_ids() {
            if let Err(e) = self.remote.abort(&upload_id, &key).await {
                warn!(upload_id = %upload_id, error = %e, "remote abort failed");
            }
        }

        self.sessions
            .write()
            .unwrap()
            .remove(session.fingerprint().digest());
        info!(fingerprint = %session.fingerprint(), "session aborted");
        self.emit(UploadEvent::Aborted {
            fingerprint: session.fingerprint().display().to_string(),
        });
    }

    /// Finalizes a fully uploaded session.
    async fn finalize(&self, session: &Arc<UploadSession>) {
        if !session.mark_finalizing() {
            return;
        }
        session.persist(self.store.as_ref());
        self.executor.emit_progress(session);

        let Some((upload_id, key)) = session.remote_ids() else {
            session.mark_error("missing remote identifiers at completion".into());
            session.persist(self.store.as_ref());
            return;
        };
        // BTreeMap iteration keeps the list strictly ascending, as the
        // completion contract requires.
        let parts = session.completed_parts();

        match self
            .remote
            .complete(&upload_id, &key, &parts, session.context_id())
            .await
        {
            Ok(()) => {
                session.mark_completed();
                if let Err(e) = self.store.clear(session.fingerprint()) {
                    warn!(fingerprint = %session.fingerprint(), error = %e, "failed to purge completed session");
                }
                self.sessions
                    .write()
                    .unwrap()
                    .remove(session.fingerprint().digest());
                info!(
                    fingerprint = %session.fingerprint(),
                    parts = parts.len(),
                    "upload completed"
                );
                self.executor.emit_progress(session);
                self.emit(UploadEvent::Completed {
                    fingerprint: session.fingerprint().display().to_string(),
                });
            }
            Err(e) => {
                error!(fingerprint = %session.fingerprint(), error = %e, "completion failed");
                // Uploaded parts stay valid; only this step retries on the
                // next resume.
                session.mark_error(format!("Completion failed: {e}"));
                session.persist(self.store.as_ref());
                self.emit(UploadEvent::Failed {
                    fingerprint: session.fingerprint().display().to_string(),
                    error: session.message(),
                });
            }
        }
    }

    fn sessions_snapshot(&self) -> Vec<Arc<UploadSession>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    /// Offline edge: force-pause everything that is uploading.
    fn handle_offline(&self) {
        for session in self.sessions_snapshot() {
            self.pause_session(&session, false);
        }
    }
}

/// Loads or plans the session for a file and registers it.
async fn attach_session(
    shared: &Arc<EngineShared>,
    source: FileSource,
    context_id: String,
) -> Result<Fingerprint, EngineError> {
    let fingerprint = source.fingerprint();

    // Re-attaching a live session is a no-op; terminal residue is dropped
    // so the file can be uploaded again.
    {
        let mut sessions = shared.sessions.write().unwrap();
        if let Some(existing) = sessions.get(fingerprint.digest()) {
            if !existing.status().is_terminal() {
                return Ok(fingerprint);
            }
            sessions.remove(fingerprint.digest());
        }
    }

    let session = match shared.store.load(&fingerprint)? {
        Some(record) => {
            info!(
                fingerprint = %fingerprint,
                uploaded = record.uploaded_parts.len(),
                total = record.total_parts,
                "restoring persisted session"
            );
            Arc::new(UploadSession::from_record(source, context_id, &record))
        }
        None => {
            let plan = PartPlan::for_size(source.size, &shared.config.limits);
            debug!(
                fingerprint = %fingerprint,
                part_size = plan.part_size,
                total_parts = plan.total_parts,
                "planned new session"
            );
            Arc::new(UploadSession::new(source, context_id, plan))
        }
    };

    shared
        .sessions
        .write()
        .unwrap()
        .insert(fingerprint.digest().to_string(), Arc::clone(&session));

    if session.is_initiated() {
        session.persist(shared.store.as_ref());
    } else if let Err(e) = shared.ensure_initiated(&session).await {
        warn!(fingerprint = %fingerprint, error = %e, "initiation failed on attach");
    }

    shared.executor.emit_progress(&session);
    Ok(fingerprint)
}

/// Common path behind `start`/`resume`/auto-resume.
async fn launch(
    shared: &Arc<EngineShared>,
    session: &Arc<UploadSession>,
) -> Result<(), EngineError> {
    let status = session.status();
    if status.is_terminal() {
        return Ok(());
    }
    // Already running; starting twice is a no-op.
    if matches!(status, SessionStatus::Uploading | SessionStatus::Finalizing) {
        return Ok(());
    }
    if !shared.reachability.is_online() {
        return Err(EngineError::Offline);
    }
    shared.ensure_initiated(session).await?;

    let token = session.reset_run_token();
    if !session.mark_uploading("Uploading...") {
        return Ok(());
    }
    session.persist(shared.store.as_ref());
    shared.executor.emit_progress(session);

    let shared = Arc::clone(shared);
    let session = Arc::clone(session);
    tokio::spawn(async move {
        run_session(shared, session, token).await;
    });
    Ok(())
}

/// Online edge: relaunch sessions that were not paused by the user.
async fn handle_online(shared: &Arc<EngineShared>) {
    for session in shared.sessions_snapshot() {
        if session.status() == SessionStatus::Paused && !session.paused_by_user() {
            if let Err(e) = launch(shared, &session).await {
                warn!(fingerprint = %session.fingerprint(), error = %e, "auto-resume failed");
            }
        }
    }
}

/// Drives one session run: drain the scheduler, then evaluate the outcome.
async fn run_session(
    shared: Arc<EngineShared>,
    session: Arc<UploadSession>,
    token: tokio_util::sync::CancellationToken,
) {
    // One run at a time per session; a resume issued while a previous run
    // winds down queues here instead of interleaving worker pools.
    let _run = session.run_guard.lock().await;

    loop {
        if session.status() != SessionStatus::Uploading || token.is_cancelled() {
            break;
        }

        let result = shared
            .scheduler
            .drain(
                Arc::clone(&shared.executor),
                Arc::clone(&session),
                token.clone(),
            )
            .await;

        if result.is_err() {
            // The executor already parked the session in `Error` with a
            // message naming the part.
            shared.emit(UploadEvent::Failed {
                fingerprint: session.fingerprint().display().to_string(),
                error: session.message(),
            });
            return;
        }

        match session.status() {
            SessionStatus::Uploading => {
                if session.uploaded_count() == session.total_parts() {
                    shared.finalize(&session).await;
                    return;
                }
                if token.is_cancelled() {
                    return;
                }
                // A worker abandoned its claim after the others had already
                // stopped; go around and pick the part up again.
                continue;
            }
            SessionStatus::Paused => {
                shared.executor.emit_progress(&session);
                return;
            }
            SessionStatus::Error => {
                shared.emit(UploadEvent::Failed {
                    fingerprint: session.fingerprint().display().to_string(),
                    error: session.message(),
                });
                return;
            }
            _ => return,
        }
    }
}

/// Watches connectivity edges for the engine's lifetime.
async fn reachability_loop(shared: Weak<EngineShared>, mut rx: watch::Receiver<bool>) {
    let mut online = *rx.borrow();
    while rx.changed().await.is_ok() {
        let now = *rx.borrow_and_update();
        if now == online {
            continue;
        }
        online = now;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if now {
            info!("connectivity restored, auto-resuming eligible sessions");
            handle_online(&shared).await;
        } else {
            info!("connectivity lost, pausing uploading sessions");
            shared.handle_offline();
        }
    }
}
