//! Single-part transfer with retry, backoff, and cancellation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::admission::AdmissionController;
use crate::config::RetryConfig;
use crate::error::EngineError;
use crate::progress::UploadEvent;
use crate::reachability::ReachabilityMonitor;
use crate::remote::StorageCoordinator;
use crate::session::UploadSession;
use crate::store::SessionStore;

/// How one part transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferOutcome {
    /// The part was written and recorded.
    Uploaded,
    /// The part was already in the uploaded set; nothing was sent.
    AlreadyUploaded,
    /// The run was paused or aborted mid-transfer. Not a failure; the part
    /// stays pending.
    Cancelled,
    /// A failure occurred while the network was offline. The session was
    /// auto-paused instead of consuming retries.
    Offline,
}

enum Attempt {
    Done(Option<String>),
    Cancelled,
}

/// Performs one part's network transfer end to end.
pub(crate) struct TransferExecutor {
    pub(crate) remote: Arc<dyn StorageCoordinator>,
    pub(crate) admission: Arc<AdmissionController>,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) reachability: ReachabilityMonitor,
    pub(crate) retry: RetryConfig,
    pub(crate) events: mpsc::Sender<UploadEvent>,
}

impl TransferExecutor {
    /// Transfers `part_number` for `session`, retrying transient failures
    /// up to the configured budget.
    ///
    /// Exactly one admission slot is held per attempt and dropped before
    /// any backoff sleep, so a backing-off part never starves other
    /// transfers. Claim release is the scheduler's job; slot release is
    /// RAII and survives every exit path.
    pub(crate) async fn transfer_part(
        &self,
        session: &Arc<UploadSession>,
        part_number: u32,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, EngineError> {
        // Idempotence guard: a duplicate claim of a finished part is a
        // success no-op, never a re-upload.
        if session.is_uploaded(part_number) {
            return Ok(TransferOutcome::AlreadyUploaded);
        }
        let Some((upload_id, key)) = session.remote_ids() else {
            return Err(EngineError::NotInitiated);
        };
        let plan = session.plan();
        let (start, end) = plan.byte_range(part_number, session.source().size);

        let mut attempt: u32 = 0;
        loop {
            let result = self
                .attempt_once(session, &upload_id, &key, part_number, start, end, cancel)
                .await;

            match result {
                Ok(Attempt::Cancelled) => return Ok(TransferOutcome::Cancelled),
                Ok(Attempt::Done(token)) => {
                    let etag = match token {
                        Some(etag) => etag,
                        None => {
                            // Backend contract issue, not a data issue:
                            // tolerated, surfaced in the logs.
                            warn!(
                                part = part_number,
                                upload_id = %upload_id,
                                "integrity token missing from part response"
                            );
                            String::new()
                        }
                    };
                    if session.record_uploaded(part_number, etag) {
                        session.persist(self.store.as_ref());
                        session.speed.add_sample(end - start);
                        self.emit_progress(session);
                    }
                    debug!(part = part_number, upload_id = %upload_id, "part uploaded");
                    return Ok(TransferOutcome::Uploaded);
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        return Ok(TransferOutcome::Cancelled);
                    }
                    if !self.reachability.is_online() {
                        // Connectivity loss is not a retry-count failure.
                        if session.mark_paused(false, "Network offline — auto-paused") {
                            session.persist(self.store.as_ref());
                            self.emit_progress(session);
                        }
                        debug!(part = part_number, "offline during transfer, session auto-paused");
                        return Ok(TransferOutcome::Offline);
                    }
                    attempt += 1;
                    if attempt >= self.retry.max_retries {
                        let message =
                            format!("part {part_number} failed after {attempt} attempts: {e}");
                        error!(part = part_number, attempts = attempt, error = %e, "part transfer failed");
                        session.mark_error(message.clone());
                        session.persist(self.store.as_ref());
                        return Err(EngineError::PartFailed {
                            part_number,
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    let delay = self.retry.delay_for_attempt(attempt - 1);
                    warn!(
                        part = part_number,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying part transfer"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(TransferOutcome::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One attempt: admission slot, presigned target, file slice, write.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_once(
        &self,
        session: &Arc<UploadSession>,
        upload_id: &str,
        key: &str,
        part_number: u32,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<Attempt, EngineError> {
        // One global slot for the duration of this attempt. Dropped at the
        // end of scope on every path.
        let _slot = tokio::select! {
            _ = cancel.cancelled() => return Ok(Attempt::Cancelled),
            slot = self.admission.acquire() => slot,
        };

        let target = tokio::select! {
            _ = cancel.cancelled() => return Ok(Attempt::Cancelled),
            res = self.remote.part_target(key, upload_id, part_number) => res?,
        };

        // Slice boundaries come from the plan alone, so a retry reads the
        // exact same bytes.
        let path = session.source().path.clone();
        let len = end - start;
        let read = tokio::task::spawn_blocking(move || crate::chunk::read_part(&path, start, len));
        let body = tokio::select! {
            _ = cancel.cancelled() => return Ok(Attempt::Cancelled),
            res = read => {
                res.map_err(|e| EngineError::Remote(format!("file read task failed: {e}")))??
            }
        };

        let token = tokio::select! {
            _ = cancel.cancelled() => return Ok(Attempt::Cancelled),
            res = self.remote.put_part(&target, body, &session.source().content_type) => res?,
        };
        Ok(Attempt::Done(token))
    }

    /// Non-blocking emit: a caller that never drains the stream must not
    /// stall transfers.
    pub(crate) fn emit_progress(&self, session: &UploadSession) {
        let event = UploadEvent::Progress {
            fingerprint: session.fingerprint().display().to_string(),
            percent: session.percent(),
            status: session.status(),
            message: session.message(),
            bytes_per_sec: session.speed.bytes_per_second(),
        };
        if let Err(e) = self.events.try_send(event) {
            debug!("dropping progress event: {e}");
        }
    }
}
