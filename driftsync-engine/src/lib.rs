//! # driftsync-engine
//!
//! The sync decision core: conflict resolution, pending-change batching and
//! flush scheduling, transfer estimation, and the executor/resolver seams to
//! the byte-moving collaborators.
//!
//! Nothing here spawns tasks or sleeps; the daemon crate owns the clock and
//! drives these pieces.

pub mod batch;
pub mod conflict;
pub mod error;
pub mod estimate;
pub mod executor;
pub mod rsync;

pub use batch::{Batch, BatchPlanner, FlushDecision, PendingChanges};
pub use conflict::{resolve, Conflict, ConflictOutcome};
pub use error::EngineError;
pub use estimate::{ProgressEstimator, ESTIMATE_WINDOW, HISTORY_LIMIT};
pub use executor::{
    HostResolver, ProgressFn, StaticHostResolver, SyncDirection, TransferExecutor, TransferStats,
};
pub use rsync::RsyncExecutor;
