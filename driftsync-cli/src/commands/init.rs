//! `driftsync init` — write a starter configuration.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use driftsync_core::config::{self, SyncSettings};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Local directory for the first mapping (defaults to the current dir).
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Project name used for the mapping and the remote directory.
    #[arg(long)]
    pub project: Option<String>,

    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        let local_path = match self.path {
            Some(path) => path,
            None => std::env::current_dir().context("could not determine current directory")?,
        };
        let local_path = local_path
            .canonicalize()
            .with_context(|| format!("local path does not exist: {}", local_path.display()))?;

        let project = match self.project {
            Some(name) => name,
            None => local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("could not derive a project name from the path; pass --project")?,
        };

        let config_path = config::config_path_at(&home);
        if config_path.exists() && !self.force {
            bail!(
                "config already exists at {}; re-run with --force to overwrite",
                config_path.display()
            );
        }

        let settings = SyncSettings::starter(&project, local_path);
        let written = config::save_at(&home, &settings)?;

        println!("{} {}", "wrote".green(), written.display());
        println!(
            "edit {} and set remote.host before starting the daemon",
            "remote.host".bold()
        );
        Ok(())
    }
}
