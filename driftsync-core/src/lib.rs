//! driftsync core library — domain types, configuration, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes, change events, status projections
//! - [`error`] — [`ConfigError`]
//! - [`config`] — load / save / validate

pub mod config;
pub mod error;
pub mod types;

pub use error::ConfigError;
pub use types::{
    ChangeEvent, ChangeKind, ConflictStrategy, DaemonStatus, FileState, MappingName,
    ProgressSnapshot, ProgressUpdate, SyncHistoryRecord, SyncMode,
};
