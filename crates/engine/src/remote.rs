//! Remote multipart coordinator seam.
//!
//! The engine never talks to a transport directly. Embedders implement
//! [`StorageCoordinator`] on top of their HTTP/WebSocket glue; tests
//! implement it with scripted mocks.

use std::future::Future;
use std::pin::Pin;

use roadhaul_protocol::{CompletedPart, InitiateOutcome, PartTarget};

use crate::error::EngineError;

/// Boxed future returned by coordinator methods.
pub type CoordinatorFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// Client-side contract of the remote multipart upload protocol.
///
/// Using a trait keeps the engine decoupled from transport and testable
/// with mocks. Implementations map transient transport failures to
/// [`EngineError::Remote`]; the engine owns retry policy.
pub trait StorageCoordinator: Send + Sync {
    /// Begins a remote multipart upload. Each call creates a new upload.
    fn initiate<'a>(&'a self, file_name: &'a str) -> CoordinatorFuture<'a, InitiateOutcome>;

    /// Returns a time-limited destination for one part's bytes.
    fn part_target<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        part_number: u32,
    ) -> CoordinatorFuture<'a, PartTarget>;

    /// Writes one part's bytes to its destination. Returns the integrity
    /// token if the backend exposed one; `Ok(None)` is tolerated.
    fn put_part<'a>(
        &'a self,
        target: &'a PartTarget,
        body: Vec<u8>,
        content_type: &'a str,
    ) -> CoordinatorFuture<'a, Option<String>>;

    /// Finalizes the upload. `parts` must be sorted ascending by part
    /// number and cover every part exactly once.
    fn complete<'a>(
        &'a self,
        upload_id: &'a str,
        key: &'a str,
        parts: &'a [CompletedPart],
        context_id: &'a str,
    ) -> CoordinatorFuture<'a, ()>;

    /// Asks the backend to discard the multipart upload. Best-effort: the
    /// engine proceeds with local cleanup regardless of the outcome.
    fn abort<'a>(&'a self, upload_id: &'a str, key: &'a str) -> CoordinatorFuture<'a, ()>;
}
