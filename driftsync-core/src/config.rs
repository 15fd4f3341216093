//! YAML configuration for driftsync.
//!
//! # Storage layout
//!
//! ```text
//! ~/.driftsync/
//!   config.yaml    (mode 0600)
//!   run/           (daemon socket + status snapshot)
//!   logs/          (daemon log files)
//! ```
//!
//! # API pattern
//!
//! Every filesystem-touching function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ConflictStrategy, MappingName, SyncMode};

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// One (local-root, remote-root) pair kept in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMapping {
    pub name: MappingName,
    /// Absolute path to the local directory.
    pub local_path: PathBuf,
    /// Path on the remote host.
    pub remote_path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-mapping exclude patterns, merged with the global set.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Locally reachable view of the remote tree (e.g. a mount point).
    /// When set, the daemon polls it for remote-side changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_poll_path: Option<PathBuf>,
}

/// How to reach the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub host: String,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Root of the driftsync configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub project_name: String,
    pub remote: RemoteConfig,
    pub mappings: Vec<DirectoryMapping>,

    /// Quiet period: seconds with no new events before a batch is eligible.
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    /// Hard floor on the spacing between consecutive sync starts.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    /// Pending-change count that triggers an immediate flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Cadence of remote-side snapshot polling.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    /// Global exclude patterns applied to every mapping.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_delay_secs() -> u64 {
    5
}

fn default_min_interval_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    50
}

fn default_poll_interval_secs() -> u64 {
    60
}

impl SyncSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Mappings that actually participate in sync.
    pub fn enabled_mappings(&self) -> impl Iterator<Item = &DirectoryMapping> {
        self.mappings.iter().filter(|m| m.enabled)
    }

    /// Merged global + per-mapping exclude patterns for one mapping.
    pub fn exclude_patterns_for(&self, mapping: &DirectoryMapping) -> Vec<String> {
        let mut patterns = self.exclude_patterns.clone();
        patterns.extend(mapping.exclude_patterns.iter().cloned());
        patterns
    }

    /// Structural validation. Fatal at start-up; the daemon refuses to run
    /// on a settings value that fails here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mappings.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one directory mapping is required".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.remote.host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "remote.host must not be empty".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for mapping in &self.mappings {
            if !seen.insert(&mapping.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate mapping name '{}'",
                    mapping.name
                )));
            }
            if !mapping.local_path.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "mapping '{}': local_path must be absolute",
                    mapping.name
                )));
            }
        }
        Ok(())
    }

    /// A starter config with placeholder remote details, for `driftsync init`.
    pub fn starter(project_name: &str, local_path: PathBuf) -> Self {
        Self {
            project_name: project_name.to_string(),
            remote: RemoteConfig {
                host: "remote.example.com".to_string(),
                user: default_ssh_user(),
                port: default_ssh_port(),
                key_file: None,
                connect_timeout_secs: default_connect_timeout_secs(),
            },
            mappings: vec![DirectoryMapping {
                name: MappingName::from(project_name),
                local_path,
                remote_path: PathBuf::from(format!("/home/ubuntu/{project_name}")),
                enabled: true,
                exclude_patterns: Vec::new(),
                remote_poll_path: None,
            }],
            delay_secs: default_delay_secs(),
            min_interval_secs: default_min_interval_secs(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval_secs(),
            mode: SyncMode::default(),
            conflict_strategy: ConflictStrategy::default(),
            exclude_patterns: vec![
                "*.tmp".to_string(),
                "*.swp".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.driftsync/` — pure, no I/O.
pub fn driftsync_root_at(home: &Path) -> PathBuf {
    home.join(".driftsync")
}

/// `<home>/.driftsync/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    driftsync_root_at(home).join("config.yaml")
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load settings from `<home>/.driftsync/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
/// The result is NOT validated; callers run [`SyncSettings::validate`]
/// before acting on it.
pub fn load_at(home: &Path) -> Result<SyncSettings, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncSettings, ConfigError> {
    load_at(&home()?)
}

/// Save settings to `<home>/.driftsync/config.yaml` (mode 0600).
///
/// Creates the `.driftsync` directory (mode 0700) if missing.
pub fn save_at(home: &Path, settings: &SyncSettings) -> Result<PathBuf, ConfigError> {
    let root = driftsync_root_at(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&path, yaml)?;
    set_file_permissions(&path)?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(settings: &SyncSettings) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, settings)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
