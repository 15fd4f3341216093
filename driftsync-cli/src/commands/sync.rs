//! `driftsync sync` — one-shot sync pass outside the daemon.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{Table, Tabled};

use driftsync_core::config;
use driftsync_core::types::SyncMode;
use driftsync_engine::{
    HostResolver, RsyncExecutor, StaticHostResolver, SyncDirection, TransferExecutor,
};

use crate::SyncModeArg;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Show what would be transferred without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Override the configured mode for this run.
    #[arg(long)]
    pub mode: Option<SyncModeArg>,

    /// Sync only the named mapping.
    #[arg(long)]
    pub mapping: Option<String>,
}

#[derive(Tabled)]
struct SyncRow {
    #[tabled(rename = "Mapping")]
    mapping: String,
    #[tabled(rename = "Files")]
    files: String,
    #[tabled(rename = "Bytes")]
    bytes: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Result")]
    result: String,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let settings = config::load_at(&home)?;
        settings.validate()?;

        let mode = self.mode.map(SyncMode::from).unwrap_or(settings.mode);
        let direction = SyncDirection::from(mode);

        let resolver = StaticHostResolver::new(settings.remote.host.clone());
        let host = resolver
            .ensure_reachable()
            .context("remote host is not reachable")?;

        let executor =
            RsyncExecutor::new(settings.remote.clone(), settings.exclude_patterns.clone());

        let mut rows = Vec::new();
        let mut failures = 0usize;
        let mut matched = 0usize;

        for mapping in settings.enabled_mappings() {
            if let Some(only) = &self.mapping {
                if mapping.name.0 != *only {
                    continue;
                }
            }
            matched += 1;

            match executor.execute(&host, direction, mapping, self.dry_run, None) {
                Ok(stats) => rows.push(SyncRow {
                    mapping: mapping.name.to_string(),
                    files: stats.files_transferred.to_string(),
                    bytes: stats.total_bytes.to_string(),
                    duration: format!("{:.1}s", stats.duration.as_secs_f64()),
                    result: if self.dry_run {
                        "dry-run".yellow().to_string()
                    } else {
                        "ok".green().to_string()
                    },
                }),
                Err(err) => {
                    failures += 1;
                    rows.push(SyncRow {
                        mapping: mapping.name.to_string(),
                        files: "-".to_string(),
                        bytes: "-".to_string(),
                        duration: "-".to_string(),
                        result: format!("{}: {err}", "failed".red()),
                    });
                }
            }
        }

        if matched == 0 {
            match &self.mapping {
                Some(name) => bail!("no enabled mapping named '{name}'"),
                None => bail!("no enabled mappings configured"),
            }
        }

        println!("{}", Table::new(rows));

        if failures > 0 {
            bail!("{failures} mapping(s) failed to sync");
        }
        Ok(())
    }
}
