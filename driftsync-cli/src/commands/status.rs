//! `driftsync status` — daemon status, socket-first with file fallback.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{Table, Tabled};

use driftsync_daemon::{read_status_file, request_status, DaemonError};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output raw JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        let payload = match request_status(&home) {
            Ok(payload) => payload,
            Err(DaemonError::DaemonNotRunning { .. }) => fallback_payload(&home)?,
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render status JSON")?
            );
            return Ok(());
        }

        let running = payload
            .get("running")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !running {
            println!("{} daemon is not running", "●".red());
            println!("use `driftsync daemon start` to start it");
            return Ok(());
        }

        let mut rows = vec![StatusRow {
            metric: "Running".to_string(),
            value: format!("{} yes", "●".green()),
        }];
        push_row(&mut rows, &payload, "last_sync_time", "Last sync");
        push_row(&mut rows, &payload, "pending_change_count", "Pending changes");
        push_row(&mut rows, &payload, "conflict_count", "Conflicts");
        push_row(&mut rows, &payload, "sync_in_progress", "Sync in progress");
        push_row(&mut rows, &payload, "error_count", "Errors");

        println!("{}", Table::new(rows));
        Ok(())
    }
}

fn push_row(rows: &mut Vec<StatusRow>, payload: &Value, key: &str, label: &str) {
    let value = match payload.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => if *b { "yes" } else { "no" }.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    };
    rows.push(StatusRow {
        metric: label.to_string(),
        value,
    });
}

/// Socket unavailable: fall back to the persisted snapshot, or report
/// not-running when there is none either.
fn fallback_payload(home: &std::path::Path) -> Result<Value> {
    match read_status_file(home)? {
        Some(status) => {
            let mut payload = serde_json::to_value(&status)?;
            if let Value::Object(ref mut map) = payload {
                map.insert("source".to_string(), json!("status-file"));
            }
            Ok(payload)
        }
        None => Ok(json!({ "running": false })),
    }
}
