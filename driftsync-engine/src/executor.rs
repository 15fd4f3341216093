//! Collaborator seams: the transfer executor and the remote host resolver.
//!
//! The engine decides *what* to sync; these traits are the boundary to the
//! code that actually moves bytes and manages remote reachability.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use driftsync_core::config::DirectoryMapping;
use driftsync_core::types::{ProgressUpdate, SyncMode};

use crate::error::EngineError;

/// Direction of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    LocalToRemote,
    RemoteToLocal,
    Bidirectional,
}

impl From<SyncMode> for SyncDirection {
    fn from(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Bidirectional => SyncDirection::Bidirectional,
            SyncMode::PushOnly => SyncDirection::LocalToRemote,
            SyncMode::PullOnly => SyncDirection::RemoteToLocal,
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::LocalToRemote => write!(f, "local-to-remote"),
            SyncDirection::RemoteToLocal => write!(f, "remote-to-local"),
            SyncDirection::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

/// Statistics from one successful transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub files_transferred: usize,
    pub total_bytes: u64,
    #[serde(skip)]
    pub duration: Duration,
}

impl TransferStats {
    pub fn merge(self, other: TransferStats) -> TransferStats {
        TransferStats {
            files_transferred: self.files_transferred + other.files_transferred,
            total_bytes: self.total_bytes + other.total_bytes,
            duration: self.duration + other.duration,
        }
    }
}

/// Callback for incremental progress tuples mid-run.
pub type ProgressFn = dyn Fn(ProgressUpdate) + Send + Sync;

/// Moves bytes for one mapping in one direction. Implementations may block;
/// the coordinator calls this from a blocking context.
///
/// Failure is the *run result* — a transfer error here is transient and
/// drives batch re-queueing, never a process-level failure.
pub trait TransferExecutor: Send + Sync {
    fn execute(
        &self,
        host: &str,
        direction: SyncDirection,
        mapping: &DirectoryMapping,
        dry_run: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<TransferStats, EngineError>;
}

/// Makes sure the remote side can be reached (power state, connectivity)
/// and yields the address to use. Called before the first transfer of an
/// attempt; failure is fatal for that attempt only.
pub trait HostResolver: Send + Sync {
    fn ensure_reachable(&self) -> Result<String, EngineError>;
}

/// Resolver for a fixed, always-on host address.
#[derive(Debug, Clone)]
pub struct StaticHostResolver {
    host: String,
}

impl StaticHostResolver {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl HostResolver for StaticHostResolver {
    fn ensure_reachable(&self) -> Result<String, EngineError> {
        if self.host.trim().is_empty() {
            return Err(EngineError::HostUnreachable(
                "no remote host configured".to_string(),
            ));
        }
        Ok(self.host.clone())
    }
}
