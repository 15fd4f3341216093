use std::path::{Path, PathBuf};

use driftsync_core::config::driftsync_root_at;

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const STATUS_FILE: &str = "status.json";

pub fn run_dir(home: &Path) -> PathBuf {
    driftsync_root_at(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn status_file_path(home: &Path) -> PathBuf {
    run_dir(home).join(STATUS_FILE)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    driftsync_root_at(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}
