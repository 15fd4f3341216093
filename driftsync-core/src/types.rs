//! Domain types shared across the driftsync workspace.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem
//! paths. Event and status types are serializable via serde so they can cross
//! the daemon's status socket unchanged.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a configured directory mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingName(pub String);

impl fmt::Display for MappingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for MappingName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MappingName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Moved => write!(f, "moved"),
        }
    }
}

/// Direction(s) a sync run moves bytes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    #[default]
    Bidirectional,
    PushOnly,
    PullOnly,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Bidirectional => write!(f, "bidirectional"),
            SyncMode::PushOnly => write!(f, "push-only"),
            SyncMode::PullOnly => write!(f, "pull-only"),
        }
    }
}

/// Policy for resolving a local and a remote edit of the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Later event timestamp wins; local wins ties.
    #[default]
    Newer,
    /// Local side always wins.
    Local,
    /// Remote side always wins.
    Remote,
    /// Never resolved automatically; surfaced for the operator.
    Manual,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::Newer => write!(f, "newer"),
            ConflictStrategy::Local => write!(f, "local"),
            ConflictStrategy::Remote => write!(f, "remote"),
            ConflictStrategy::Manual => write!(f, "manual"),
        }
    }
}

// ---------------------------------------------------------------------------
// Change events and file state
// ---------------------------------------------------------------------------

/// A single observed filesystem change, relative to its mapping's root.
///
/// Immutable once created: detectors construct these and everything
/// downstream only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Path relative to the watched root.
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
    /// On-disk size at detection time, when the file still existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Hex SHA-256 digest, only present for files under the hash ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Previous path for `Moved` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<PathBuf>,
}

impl ChangeEvent {
    /// Build an event stamped `Utc::now()` with no size/hash metadata.
    pub fn now(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: Utc::now(),
            size: None,
            content_hash: None,
            old_path: None,
        }
    }
}

/// Per-file snapshot entry: what the detector knew about a file the last
/// time it looked. Exactly one entry exists per file per snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub size: u64,
    pub modified: SystemTime,
    /// Only computed for files under the hash ceiling; `None` means
    /// size + mtime comparison is authoritative.
    pub content_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Run history and progress
// ---------------------------------------------------------------------------

/// Outcome statistics for one completed sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncHistoryRecord {
    pub duration: Duration,
    /// The size estimate taken at the start of the run.
    pub total_size_bytes: u64,
    pub file_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Incremental progress reported by the transfer executor mid-run.
///
/// Stored verbatim by the estimator; none of these fields are recomputed
/// while a run is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub bytes_transferred: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<PathBuf>,
    pub files_completed: usize,
    pub rate_bytes_per_sec: f64,
    pub eta_seconds: f64,
    pub percentage: f64,
}

/// Live view of the current (or most recent) sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProgressSnapshot {
    pub in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    pub estimated_total_bytes: u64,
    pub transferred_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<PathBuf>,
    pub files_completed: usize,
    pub total_files: usize,
    pub rate_bytes_per_sec: f64,
    pub eta_seconds: f64,
    pub percentage: f64,
}

impl ProgressSnapshot {
    /// Fold an executor progress tuple into this snapshot, verbatim.
    pub fn apply(&mut self, update: &ProgressUpdate) {
        self.transferred_bytes = update.bytes_transferred;
        self.current_file = update.current_file.clone();
        self.files_completed = update.files_completed;
        self.rate_bytes_per_sec = update.rate_bytes_per_sec;
        self.eta_seconds = update.eta_seconds;
        self.percentage = update.percentage;
    }
}

// ---------------------------------------------------------------------------
// Status projection
// ---------------------------------------------------------------------------

/// Read-only daemon status projection for external consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DaemonStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_change_count: usize,
    pub conflict_count: usize,
    pub sync_in_progress: bool,
    pub error_count: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
