//! Status snapshot persistence.
//!
//! The daemon refreshes `~/.driftsync/run/status.json` after state-changing
//! transitions as a convenience for out-of-process queries when the socket
//! is unavailable. The socket remains the authoritative source.

use std::fs;
use std::path::{Path, PathBuf};

use driftsync_core::types::DaemonStatus;

use crate::error::{io_err, DaemonError};
use crate::paths::status_file_path;

/// Write the status snapshot via tmp-then-rename so readers never observe a
/// partial file.
pub fn write_status_file(home: &Path, status: &DaemonStatus) -> Result<(), DaemonError> {
    let path = status_file_path(home);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let payload = serde_json::to_string_pretty(status)?;
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&tmp, payload).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, &path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// Read a previously persisted snapshot, if any.
pub fn read_status_file(home: &Path) -> Result<Option<DaemonStatus>, DaemonError> {
    let path = status_file_path(home);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Remove the snapshot on clean shutdown so a stale file never claims the
/// daemon is running.
pub fn remove_status_file(home: &Path) {
    let path = status_file_path(home);
    if path.exists() {
        let _ = fs::remove_file(&path);
    }
}
