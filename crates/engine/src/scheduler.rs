//! Per-session worker pool.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use roadhaul_protocol::SessionStatus;

use crate::error::EngineError;
use crate::executor::{TransferExecutor, TransferOutcome};
use crate::session::UploadSession;

/// Runs a bounded pool of workers that claim pending parts and feed them
/// to the transfer executor until the session is paused, aborted, or out
/// of claimable parts.
pub(crate) struct PartScheduler {
    concurrency: usize,
}

impl PartScheduler {
    pub(crate) fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Spawns the workers and joins them all. When this returns, no
    /// executor call for this session is still in flight, so the caller
    /// may evaluate completion. The first hard error is propagated.
    pub(crate) async fn drain(
        &self,
        executor: Arc<TransferExecutor>,
        session: Arc<UploadSession>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut workers = JoinSet::new();
        for worker_id in 0..self.concurrency {
            let executor = Arc::clone(&executor);
            let session = Arc::clone(&session);
            let cancel = cancel.clone();
            workers.spawn(async move { worker_loop(worker_id, executor, session, cancel).await });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => warn!(error = %e, "upload worker panicked"),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    executor: Arc<TransferExecutor>,
    session: Arc<UploadSession>,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    loop {
        if cancel.is_cancelled() || session.status() != SessionStatus::Uploading {
            trace!(worker = worker_id, "worker stopping: session left uploading");
            return Ok(());
        }
        let Some(part_number) = session.claim_next() else {
            trace!(worker = worker_id, "worker stopping: no claimable part");
            return Ok(());
        };
        // The cursor advance must survive a crash.
        session.persist(executor.store.as_ref());

        let result = executor.transfer_part(&session, part_number, &cancel).await;
        // Whatever happened, the claim is released so another worker or a
        // later resume can re-attempt a part that did not reach uploaded.
        session.release_claim(part_number);

        match result {
            Ok(TransferOutcome::Uploaded | TransferOutcome::AlreadyUploaded) => {}
            Ok(TransferOutcome::Cancelled | TransferOutcome::Offline) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionController;
    use crate::chunk::{PartLimits, PartPlan};
    use crate::config::RetryConfig;
    use crate::error::EngineError;
    use crate::reachability::ReachabilityMonitor;
    use crate::remote::{CoordinatorFuture, StorageCoordinator};
    use crate::source::FileSource;
    use crate::store::MemoryStore;
    use roadhaul_protocol::{CompletedPart, InitiateOutcome, PartTarget};
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Mock that records per-part put counts.
    struct CountingRemote {
        puts: Mutex<HashMap<u32, u32>>,
    }

    impl CountingRemote {
        fn new() -> Self {
            Self {
                puts: Mutex::new(HashMap::new()),
            }
        }
    }

    impl StorageCoordinator for CountingRemote {
        fn initiate<'a>(&'a self, _file_name: &'a str) -> CoordinatorFuture<'a, InitiateOutcome> {
            Box::pin(async {
                Ok(InitiateOutcome {
                    upload_id: "u".into(),
                    key: "k".into(),
                })
            })
        }

        fn part_target<'a>(
            &'a self,
            _key: &'a str,
            _upload_id: &'a str,
            part_number: u32,
        ) -> CoordinatorFuture<'a, PartTarget> {
            Box::pin(async move {
                Ok(PartTarget {
                    write_url: format!("mock://{part_number}"),
                })
            })
        }

        fn put_part<'a>(
            &'a self,
            target: &'a PartTarget,
            _body: Vec<u8>,
            _content_type: &'a str,
        ) -> CoordinatorFuture<'a, Option<String>> {
            Box::pin(async move {
                let part: u32 = target.write_url.rsplit("//").next().unwrap().parse().unwrap();
                *self.puts.lock().unwrap().entry(part).or_default() += 1;
                Ok(Some(format!("etag-{part}")))
            })
        }

        fn complete<'a>(
            &'a self,
            _upload_id: &'a str,
            _key: &'a str,
            _parts: &'a [CompletedPart],
            _context_id: &'a str,
        ) -> CoordinatorFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }

        fn abort<'a>(&'a self, _upload_id: &'a str, _key: &'a str) -> CoordinatorFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    fn test_session(dir: &std::path::Path, parts: u32) -> Arc<UploadSession> {
        let path = dir.join("video.mp4");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![7u8; parts as usize * 32]).unwrap();
        drop(f);

        let source = FileSource::from_path(&path).unwrap();
        let limits = PartLimits {
            target_parts: 1000,
            min_part_size: 32,
            max_part_size: 32,
        };
        let plan = PartPlan::for_size(source.size, &limits);
        let session = Arc::new(UploadSession::new(source, "trip-1".into(), plan));
        session.set_remote_ids("u".into(), "k".into());
        session.mark_uploading("Uploading...");
        session
    }

    fn executor_for(remote: Arc<CountingRemote>) -> Arc<TransferExecutor> {
        let (events, _rx) = mpsc::channel(256);
        Arc::new(TransferExecutor {
            remote,
            admission: Arc::new(AdmissionController::new(4)),
            store: Arc::new(MemoryStore::new()),
            reachability: ReachabilityMonitor::new(true),
            retry: RetryConfig::default(),
            events,
        })
    }

    #[tokio::test]
    async fn drain_uploads_every_part_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path(), 7);
        let remote = Arc::new(CountingRemote::new());
        let executor = executor_for(Arc::clone(&remote));

        let scheduler = PartScheduler::new(3);
        scheduler
            .drain(executor, Arc::clone(&session), session.run_token())
            .await
            .unwrap();

        assert_eq!(session.uploaded_count(), 7);
        assert!(!session.has_claims());
        let puts = remote.puts.lock().unwrap();
        for n in 1..=7 {
            assert_eq!(puts.get(&n), Some(&1), "part {n}");
        }
    }

    #[tokio::test]
    async fn drain_skips_parts_already_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path(), 5);
        session.record_uploaded(2, "old-2".into());
        session.record_uploaded(4, "old-4".into());

        let remote = Arc::new(CountingRemote::new());
        let executor = executor_for(Arc::clone(&remote));
        PartScheduler::new(2)
            .drain(executor, Arc::clone(&session), session.run_token())
            .await
            .unwrap();

        assert_eq!(session.uploaded_count(), 5);
        let puts = remote.puts.lock().unwrap();
        assert!(!puts.contains_key(&2));
        assert!(!puts.contains_key(&4));
        // Recorded tokens were not overwritten.
        let parts = session.completed_parts();
        assert_eq!(parts[1].etag, "old-2");
    }

    #[tokio::test]
    async fn cancelled_drain_leaves_no_claims() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path(), 6);
        let remote = Arc::new(CountingRemote::new());
        let executor = executor_for(Arc::clone(&remote));

        let token = session.run_token();
        token.cancel();
        PartScheduler::new(2)
            .drain(executor, Arc::clone(&session), token)
            .await
            .unwrap();

        assert!(!session.has_claims());
        assert_eq!(session.uploaded_count(), 0);
    }

    #[tokio::test]
    async fn drain_reports_hard_errors() {
        struct FailingRemote;
        impl StorageCoordinator for FailingRemote {
            fn initiate<'a>(
                &'a self,
                _file_name: &'a str,
            ) -> CoordinatorFuture<'a, InitiateOutcome> {
                Box::pin(async { Err(EngineError::Remote("down".into())) })
            }
            fn part_target<'a>(
                &'a self,
                _key: &'a str,
                _upload_id: &'a str,
                _part_number: u32,
            ) -> CoordinatorFuture<'a, PartTarget> {
                Box::pin(async { Err(EngineError::Remote("HTTP 503".into())) })
            }
            fn put_part<'a>(
                &'a self,
                _target: &'a PartTarget,
                _body: Vec<u8>,
                _content_type: &'a str,
            ) -> CoordinatorFuture<'a, Option<String>> {
                Box::pin(async { Err(EngineError::Remote("HTTP 503".into())) })
            }
            fn complete<'a>(
                &'a self,
                _upload_id: &'a str,
                _key: &'a str,
                _parts: &'a [CompletedPart],
                _context_id: &'a str,
            ) -> CoordinatorFuture<'a, ()> {
                Box::pin(async { Ok(()) })
            }
            fn abort<'a>(&'a self, _upload_id: &'a str, _key: &'a str) -> CoordinatorFuture<'a, ()> {
                Box::pin(async { Ok(()) })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path(), 4);
        let (events, _rx) = mpsc::channel(256);
        let executor = Arc::new(TransferExecutor {
            remote: Arc::new(FailingRemote),
            admission: Arc::new(AdmissionController::new(4)),
            store: Arc::new(MemoryStore::new()),
            reachability: ReachabilityMonitor::new(true),
            retry: RetryConfig {
                max_retries: 2,
                base_delay: std::time::Duration::from_millis(1),
                ..RetryConfig::default()
            },
            events,
        });

        let err = PartScheduler::new(2)
            .drain(executor, Arc::clone(&session), session.run_token())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PartFailed { .. }));
        assert!(!session.has_claims());
    }
}
