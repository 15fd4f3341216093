//! Change detection for driftsync.
//!
//! Two operating modes share one output type ([`ChangeEvent`]):
//! - **push** — [`push::filter_notification`] turns raw watcher notifications
//!   into root-relative events;
//! - **poll** — [`snapshot::PollDetector`] diffs full-tree snapshots on a
//!   cadence, for roots without push notifications (the remote side).
//!
//! [`exclude::ExcludeMatcher`] gates both modes.
//!
//! [`ChangeEvent`]: driftsync_core::types::ChangeEvent

use thiserror::Error;

pub mod exclude;
pub mod push;
pub mod snapshot;

pub use exclude::ExcludeMatcher;
pub use push::{filter_notification, RawNotification};
pub use snapshot::{PollDetector, TreeSnapshot, HASH_SIZE_CEILING};

/// Errors from detector construction. Scan-time failures on individual
/// entries are absorbed (skipped), never surfaced here.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}
