//! Logs command - view and manage the event log

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;

use gumshoe_core::{EntryPoint, LoggingService};

use super::Target;
use crate::output;

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show recent log entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Show only errors
        #[arg(long)]
        errors: bool,
        /// Show every entry of one migration run
        #[arg(long, conflicts_with = "errors")]
        run: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear old log entries
    Clear {
        /// Delete logs older than N days
        #[arg(long, default_value = "30")]
        older_than_days: u64,
        /// Delete every entry
        #[arg(long, conflicts_with = "older_than_days")]
        all: bool,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show log statistics and database path
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn get_logging_service(target: &Target) -> Result<LoggingService> {
    LoggingService::new(&target.data_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))
}

fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

pub fn run(target: &Target, command: LogsCommands) -> Result<()> {
    let service = get_logging_service(target)?;

    match command {
        LogsCommands::List {
            limit,
            errors,
            run,
            json,
        } => {
            let entries = match (&run, errors) {
                (Some(run_id), _) => service.get_run(run_id)?,
                (None, true) => service.get_errors(limit)?,
                (None, false) => service.get_recent(limit)?,
            };

            if json {
                output::json(&entries)?;
                return Ok(());
            }

            if entries.is_empty() {
                println!("No log entries found.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Time", "Event", "Command", "Database", "Error"]);

            for entry in &entries {
                let error = entry
                    .error_message
                    .as_deref()
                    .map(|m| m.red().to_string())
                    .unwrap_or_default();

                table.add_row(vec![
                    format_timestamp(entry.timestamp),
                    entry.event.clone(),
                    entry.command.clone().unwrap_or_default(),
                    entry.database_name.clone().unwrap_or_default(),
                    error,
                ]);
            }

            println!("{}", table);
        }
        LogsCommands::Clear {
            older_than_days,
            all,
            force,
            json,
        } => {
            let prompt = if all {
                "Delete all log entries?".to_string()
            } else {
                format!("Delete logs older than {} days?", older_than_days)
            };

            if !force && !json && !Confirm::new().with_prompt(prompt).default(false).interact()? {
                println!("Cancelled.");
                return Ok(());
            }

            let deleted = if all {
                service.clear()?
            } else {
                let cutoff = Utc::now() - Duration::days(older_than_days as i64);
                service.delete_before(cutoff.timestamp_millis())?
            };

            if json {
                println!("{}", serde_json::json!({ "deleted": deleted }));
            } else {
                println!("Deleted {} log entries", deleted);
            }
        }
        LogsCommands::Stats { json } => {
            let stats = service.stats()?;
            let db_path = service.db_path().to_path_buf();
            let size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "stats": stats,
                        "database_path": db_path.to_string_lossy(),
                        "database_size_bytes": size_bytes
                    })
                );
                return Ok(());
            }

            println!("{}", "Log Statistics".bold());
            println!("  Total entries: {}", stats.total);
            println!("  Errors: {}", stats.errors);
            if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                println!(
                    "  Range: {} to {}",
                    format_timestamp(oldest),
                    format_timestamp(newest)
                );
            }
            println!("  Database: {}", db_path.display());
            println!("  Size: {}", output::format_size(size_bytes));

            if !stats.by_event.is_empty() {
                println!();
                let mut table = output::create_table();
                table.set_header(vec!["Event", "Count"]);
                for row in &stats.by_event {
                    table.add_row(vec![row.event.clone(), row.count.to_string()]);
                }
                println!("{}", table);
            }
        }
    }

    Ok(())
}
