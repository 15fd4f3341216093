//! Poll-mode change detection: full-tree snapshots and snapshot diffing.
//!
//! A [`TreeSnapshot`] holds one [`FileState`] per existing file, keyed by
//! path relative to the scanned root. [`PollDetector`] owns the previous
//! snapshot and turns each new scan into a list of [`ChangeEvent`]s.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use driftsync_core::types::{ChangeEvent, ChangeKind, FileState};

use crate::exclude::ExcludeMatcher;

/// Files at or above this size are never content-hashed; size + mtime
/// comparison is authoritative for them.
pub const HASH_SIZE_CEILING: u64 = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// TreeSnapshot
// ---------------------------------------------------------------------------

/// Immutable view of a tree at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    states: HashMap<PathBuf, FileState>,
}

impl TreeSnapshot {
    /// Scan `root` with the default hash ceiling.
    ///
    /// A missing root yields an empty snapshot. A single unreadable entry is
    /// skipped; it never fails the scan.
    pub fn scan(root: &Path, excludes: &ExcludeMatcher) -> Self {
        Self::scan_with_ceiling(root, excludes, HASH_SIZE_CEILING)
    }

    /// Scan with an explicit hash ceiling (tests shrink it to exercise the
    /// over-ceiling path without writing 10 MiB files).
    pub fn scan_with_ceiling(root: &Path, excludes: &ExcludeMatcher, ceiling: u64) -> Self {
        let mut states = HashMap::new();
        if !root.exists() {
            return Self { states };
        }

        // Breadth-first walk; unreadable directories and files are skipped
        // individually so one bad entry never aborts the cycle.
        let mut dirs = vec![root.to_path_buf()];
        let mut cursor = 0;
        while cursor < dirs.len() {
            let current = dirs[cursor].clone();
            cursor += 1;

            let entries = match fs::read_dir(&current) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries {
                let Ok(entry) = entry else { continue };
                let path = entry.path();
                let Ok(rel) = path.strip_prefix(root) else { continue };
                if excludes.should_ignore(rel) {
                    continue;
                }
                let Ok(ty) = entry.file_type() else { continue };
                if ty.is_dir() {
                    dirs.push(path);
                } else if ty.is_file() {
                    if let Some(state) = file_state(&path, ceiling) {
                        states.insert(rel.to_path_buf(), state);
                    }
                }
            }
        }

        Self { states }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, rel_path: &Path) -> Option<&FileState> {
        self.states.get(rel_path)
    }

    /// Diff `self` (older) against `newer`, producing one event per changed
    /// path. Events are stamped at diff time.
    pub fn diff(&self, newer: &TreeSnapshot) -> Vec<ChangeEvent> {
        let now = Utc::now();
        let mut changes = Vec::new();

        for (rel, state) in &newer.states {
            match self.states.get(rel) {
                None => changes.push(ChangeEvent {
                    path: rel.clone(),
                    kind: ChangeKind::Created,
                    timestamp: now,
                    size: Some(state.size),
                    content_hash: state.content_hash.clone(),
                    old_path: None,
                }),
                Some(old) if state_changed(old, state) => changes.push(ChangeEvent {
                    path: rel.clone(),
                    kind: ChangeKind::Modified,
                    timestamp: now,
                    size: Some(state.size),
                    content_hash: state.content_hash.clone(),
                    old_path: None,
                }),
                Some(_) => {}
            }
        }

        for rel in self.states.keys() {
            if !newer.states.contains_key(rel) {
                changes.push(ChangeEvent {
                    path: rel.clone(),
                    kind: ChangeKind::Deleted,
                    timestamp: now,
                    size: None,
                    content_hash: None,
                    old_path: None,
                });
            }
        }

        changes
    }
}

/// `Modified` when the (mtime, hash) pair differs. With a hash on both sides
/// the digest settles it; otherwise size + mtime are authoritative.
fn state_changed(old: &FileState, new: &FileState) -> bool {
    old.size != new.size || old.modified != new.modified || old.content_hash != new.content_hash
}

/// Stat one file and digest it when under the ceiling. Any I/O failure
/// (permission, race with deletion) yields `None` and the file is skipped
/// for this cycle.
fn file_state(path: &Path, ceiling: u64) -> Option<FileState> {
    let meta = fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    let size = meta.len();

    let content_hash = if size < ceiling {
        let bytes = fs::read(path).ok()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Some(hex::encode(hasher.finalize()))
    } else {
        None
    };

    Some(FileState {
        size,
        modified,
        content_hash,
    })
}

// ---------------------------------------------------------------------------
// PollDetector
// ---------------------------------------------------------------------------

/// Owns the previous snapshot for one root and emits change events per poll
/// cycle. The first cycle reports every existing file as `Created`, which is
/// what seeds the initial sync.
#[derive(Debug)]
pub struct PollDetector {
    root: PathBuf,
    excludes: ExcludeMatcher,
    snapshot: TreeSnapshot,
    ceiling: u64,
}

impl PollDetector {
    pub fn new(root: PathBuf, excludes: ExcludeMatcher) -> Self {
        Self {
            root,
            excludes,
            snapshot: TreeSnapshot::default(),
            ceiling: HASH_SIZE_CEILING,
        }
    }

    #[cfg(test)]
    fn with_ceiling(root: PathBuf, excludes: ExcludeMatcher, ceiling: u64) -> Self {
        Self {
            root,
            excludes,
            snapshot: TreeSnapshot::default(),
            ceiling,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run one poll cycle: scan, diff against the previous snapshot, then
    /// replace it atomically (the new state only becomes visible here, after
    /// diffing completes).
    pub fn poll(&mut self) -> Vec<ChangeEvent> {
        let next = TreeSnapshot::scan_with_ceiling(&self.root, &self.excludes, self.ceiling);
        let changes = self.snapshot.diff(&next);
        self.snapshot = next;
        changes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
