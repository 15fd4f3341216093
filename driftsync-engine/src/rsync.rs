//! rsync-backed [`TransferExecutor`].
//!
//! Thin plumbing: command construction, execution, and `--stats` parsing.
//! All decisions about *when* to sync and *what* is pending live upstream.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use driftsync_core::config::{DirectoryMapping, RemoteConfig};
use driftsync_core::types::ProgressUpdate;

use crate::error::EngineError;
use crate::executor::{ProgressFn, SyncDirection, TransferExecutor, TransferStats};

/// Shells out to `rsync` over ssh for each leg of a run.
#[derive(Debug, Clone)]
pub struct RsyncExecutor {
    remote: RemoteConfig,
    global_excludes: Vec<String>,
}

impl RsyncExecutor {
    pub fn new(remote: RemoteConfig, global_excludes: Vec<String>) -> Self {
        Self {
            remote,
            global_excludes,
        }
    }

    fn ssh_command(&self) -> String {
        let mut ssh = format!("ssh -p {}", self.remote.port);
        if let Some(key) = &self.remote.key_file {
            ssh.push_str(&format!(" -i {}", key.display()));
        }
        ssh.push_str(&format!(
            " -o ConnectTimeout={}",
            self.remote.connect_timeout_secs
        ));
        ssh
    }

    fn run_leg(
        &self,
        host: &str,
        leg: SyncDirection,
        mapping: &DirectoryMapping,
        dry_run: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<TransferStats, EngineError> {
        let args = rsync_args(
            &self.ssh_command(),
            &self.global_excludes,
            host,
            &self.remote.user,
            leg,
            mapping,
            dry_run,
        );
        tracing::info!("running rsync {} for mapping '{}'", leg, mapping.name);
        tracing::debug!("rsync args: {:?}", args);

        let started = Instant::now();
        let output = Command::new("rsync")
            .args(&args)
            .output()
            .map_err(|source| EngineError::Spawn {
                program: "rsync".to_string(),
                source,
            })?;
        let duration = started.elapsed();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Transfer(format!(
                "rsync exited with {} for mapping '{}': {}",
                output.status,
                mapping.name,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (files_transferred, total_bytes) = parse_stats(&stdout);
        let stats = TransferStats {
            files_transferred,
            total_bytes,
            duration,
        };

        if let Some(progress) = progress {
            progress(ProgressUpdate {
                bytes_transferred: total_bytes,
                current_file: None,
                files_completed: files_transferred,
                rate_bytes_per_sec: if duration.as_secs_f64() > 0.0 {
                    total_bytes as f64 / duration.as_secs_f64()
                } else {
                    0.0
                },
                eta_seconds: 0.0,
                percentage: 100.0,
            });
        }

        Ok(stats)
    }
}

impl TransferExecutor for RsyncExecutor {
    fn execute(
        &self,
        host: &str,
        direction: SyncDirection,
        mapping: &DirectoryMapping,
        dry_run: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<TransferStats, EngineError> {
        match direction {
            SyncDirection::LocalToRemote | SyncDirection::RemoteToLocal => {
                self.run_leg(host, direction, mapping, dry_run, progress)
            }
            // Push leg first, then pull; the first failure aborts the run.
            SyncDirection::Bidirectional => {
                let push =
                    self.run_leg(host, SyncDirection::LocalToRemote, mapping, dry_run, progress)?;
                let pull =
                    self.run_leg(host, SyncDirection::RemoteToLocal, mapping, dry_run, progress)?;
                Ok(push.merge(pull))
            }
        }
    }
}

/// Build the full rsync argument list for a single leg. Pure.
fn rsync_args(
    ssh_command: &str,
    global_excludes: &[String],
    host: &str,
    user: &str,
    leg: SyncDirection,
    mapping: &DirectoryMapping,
    dry_run: bool,
) -> Vec<String> {
    let mut args = vec!["-az".to_string(), "--stats".to_string()];

    if dry_run {
        args.push("--dry-run".to_string());
    }

    args.push("-e".to_string());
    args.push(ssh_command.to_string());

    for pattern in global_excludes.iter().chain(&mapping.exclude_patterns) {
        args.push(format!("--exclude={pattern}"));
    }
    // Hidden paths never participate in sync.
    args.push("--exclude=.*".to_string());

    args.extend([
        "--partial".to_string(),
        "--partial-dir=.rsync-partial".to_string(),
        "--timeout=300".to_string(),
        "--contimeout=60".to_string(),
    ]);

    let local = dir_arg(&mapping.local_path);
    let remote = format!("{user}@{host}:{}", dir_arg(&mapping.remote_path));
    match leg {
        SyncDirection::LocalToRemote => args.extend([local, remote]),
        SyncDirection::RemoteToLocal => args.extend([remote, local]),
        // Callers split bidirectional runs into two legs before this point.
        SyncDirection::Bidirectional => unreachable!("bidirectional is composed of two legs"),
    }

    args
}

/// rsync wants directory sources/destinations with a trailing slash.
fn dir_arg(path: &Path) -> String {
    let mut s = path.display().to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

/// Pull (files transferred, bytes transferred) out of `rsync --stats` output.
/// Unparseable output degrades to zeros; stats are informational only.
fn parse_stats(stdout: &str) -> (usize, u64) {
    let mut files = 0usize;
    let mut bytes = 0u64;
    for line in stdout.lines() {
        let line = line.trim();
        if let Some(rest) = line
            .strip_prefix("Number of regular files transferred:")
            .or_else(|| line.strip_prefix("Number of files transferred:"))
        {
            files = parse_count(rest).unwrap_or(0) as usize;
        } else if let Some(rest) = line.strip_prefix("Total transferred file size:") {
            bytes = parse_count(rest).unwrap_or(0);
        }
    }
    (files, bytes)
}

/// Parse a number like ` 1,234 bytes`, tolerating thousands separators.
fn parse_count(field: &str) -> Option<u64> {
    let digits: String = field
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
