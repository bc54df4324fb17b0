//! Shared data types for the roadhaul upload engine.
//!
//! Everything here is plain serde data: the contract types exchanged with
//! the remote multipart coordinator and the durable session record the
//! engine persists between runs. No live handles; the engine crate owns
//! all behavior.

pub mod records;
pub mod types;

pub use records::SessionRecord;
pub use types::{CompletedPart, InitiateOutcome, PartTarget, SessionStatus};
