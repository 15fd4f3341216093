//! Push-mode change detection: raw notification filtering.
//!
//! The daemon feeds raw filesystem notifications (from its watcher backend)
//! through [`filter_notification`], which drops directory events and excluded
//! paths and emits a root-relative [`ChangeEvent`] stamped at arrival time.

use std::fs;
use std::path::{Path, PathBuf};

use driftsync_core::types::{ChangeEvent, ChangeKind};

use crate::exclude::ExcludeMatcher;

/// One raw notification as delivered by a filesystem notification source.
#[derive(Debug, Clone)]
pub struct RawNotification {
    /// Absolute path the backend reported.
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub is_directory: bool,
}

/// Filter one raw notification against a watched root.
///
/// Returns `None` for directory events, paths outside `root`, and anything
/// the exclude matcher rejects. The emitted event carries the path relative
/// to `root` and, for non-deletions, the current on-disk size when the file
/// can still be stat'ed.
pub fn filter_notification(
    root: &Path,
    excludes: &ExcludeMatcher,
    raw: RawNotification,
) -> Option<ChangeEvent> {
    if raw.is_directory {
        return None;
    }
    let rel = raw.path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() || excludes.should_ignore(rel) {
        return None;
    }

    let size = match raw.kind {
        ChangeKind::Deleted => None,
        _ => fs::metadata(&raw.path).ok().map(|m| m.len()),
    };

    let mut event = ChangeEvent::now(rel.to_path_buf(), raw.kind);
    event.size = size;
    Some(event)
}
