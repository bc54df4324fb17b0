//! Resumable multipart upload engine for long-haul survey video files.
//!
//! Splits a file into parts, schedules concurrent transfers under
//! per-session and global concurrency limits, persists progress so an
//! upload survives a crash, reacts to connectivity loss, retries transient
//! failures, and drives the remote multipart protocol
//! (initiate → per-part transfer → complete/abort) to a terminal state.
//!
//! The engine owns orchestration only: the caller supplies the file, the
//! transport glue implements [`StorageCoordinator`], and persistence goes
//! through a pluggable [`SessionStore`].

mod admission;
mod chunk;
mod config;
mod engine;
mod error;
mod executor;
mod progress;
mod reachability;
mod remote;
mod scheduler;
mod session;
mod source;
mod store;

pub use admission::{AdmissionController, AdmissionSlot};
pub use chunk::{PartLimits, PartPlan, read_part};
pub use config::{EngineConfig, RetryConfig};
pub use engine::UploadEngine;
pub use error::EngineError;
pub use progress::{SpeedCalculator, UploadEvent};
pub use reachability::ReachabilityMonitor;
pub use remote::{CoordinatorFuture, StorageCoordinator};
pub use session::UploadSession;
pub use source::{FileSource, Fingerprint, source_for_path};
pub use store::{JsonFileStore, MemoryStore, SessionStore};

pub use roadhaul_protocol::{CompletedPart, InitiateOutcome, PartTarget, SessionRecord, SessionStatus};
