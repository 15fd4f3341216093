//! driftsync — local/remote tree sync CLI.
//!
//! # Usage
//!
//! ```text
//! driftsync init [--path <dir>] [--project <name>] [--force]
//! driftsync sync [--dry-run] [--mode bidirectional|push-only|pull-only] [--mapping <name>]
//! driftsync status [--json]
//! driftsync daemon start|stop|status|flush|logs
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, init::InitArgs, status::StatusArgs, sync::SyncArgs};
use driftsync_core::types::SyncMode;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "driftsync",
    version,
    about = "Keep a local tree and a remote tree approximately consistent",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration to ~/.driftsync/config.yaml.
    Init(InitArgs),

    /// Run one sync pass over the configured mappings.
    Sync(SyncArgs),

    /// Show daemon status (socket first, status-file fallback).
    Status(StatusArgs),

    /// Manage the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared SyncMode argument — parsed from CLI strings, converts to core type
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `SyncMode` from CLI args.
#[derive(Debug, Clone, Default)]
pub struct SyncModeArg(pub SyncMode);

impl FromStr for SyncModeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bidirectional" | "both" => Ok(Self(SyncMode::Bidirectional)),
            "push-only" | "push" => Ok(Self(SyncMode::PushOnly)),
            "pull-only" | "pull" => Ok(Self(SyncMode::PullOnly)),
            other => Err(format!(
                "unknown sync mode '{other}'; expected: bidirectional, push-only, pull-only"
            )),
        }
    }
}

impl fmt::Display for SyncModeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<SyncModeArg> for SyncMode {
    fn from(m: SyncModeArg) -> Self {
        m.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
