//! Conflict resolution for bidirectional sync.
//!
//! A conflict exists when a local and a remote change touch the same logical
//! path. [`resolve`] is a pure decision function: no I/O, and it never
//! triggers a transfer itself.

use std::path::PathBuf;

use driftsync_core::types::{ChangeEvent, ConflictStrategy, MappingName};

/// Which side an automatic resolution picked, or that none is possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    LocalWins,
    RemoteWins,
    /// No automatic winner; the pair is surfaced, not applied.
    ManualRequired,
}

/// A surfaced local/remote pair that needs operator attention.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub mapping: MappingName,
    pub path: PathBuf,
    pub local: ChangeEvent,
    pub remote: ChangeEvent,
}

/// Decide which side wins for one conflicting path.
///
/// `Newer` compares event timestamps; the later one wins and **local wins
/// ties**. `Manual` returns no winner.
pub fn resolve(
    local: &ChangeEvent,
    remote: &ChangeEvent,
    strategy: ConflictStrategy,
) -> (ConflictOutcome, Option<ChangeEvent>) {
    match strategy {
        ConflictStrategy::Local => (ConflictOutcome::LocalWins, Some(local.clone())),
        ConflictStrategy::Remote => (ConflictOutcome::RemoteWins, Some(remote.clone())),
        ConflictStrategy::Newer => {
            if local.timestamp >= remote.timestamp {
                (ConflictOutcome::LocalWins, Some(local.clone()))
            } else {
                (ConflictOutcome::RemoteWins, Some(remote.clone()))
            }
        }
        ConflictStrategy::Manual => (ConflictOutcome::ManualRequired, None),
    }
}
