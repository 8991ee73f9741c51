//! Backup command - manage database snapshots

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;

use gumshoe_core::config::Config;
use gumshoe_core::services::BackupService;
use gumshoe_core::LogEvent;

use super::{get_context, get_logger, log_event, Target};
use crate::output;

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a new backup
    Create {
        /// Maximum number of backups to keep (default: backup.maxBackups)
        #[arg(long, short = 'm')]
        max_backups: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List available backups
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore from a backup
    Restore {
        /// Backup name to restore
        name: String,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear all backups
    Clear {
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Get a BackupService without opening the database
/// Used for operations that don't need it (list, restore, clear)
fn get_backup_service(target: &Target) -> Result<BackupService> {
    let config = Config::load(&target.data_dir)?;
    let database = config.resolve_database(target.database.as_deref())?;
    Ok(BackupService::new(config.data_dir, &database.name, database.path))
}

fn confirm(prompt: String) -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

pub fn run(target: &Target, command: BackupCommands) -> Result<()> {
    match command {
        BackupCommands::Create { max_backups, json } => {
            let ctx = get_context(target)?;
            ctx.repository.checkpoint()?;
            let max = max_backups.unwrap_or(ctx.config.backup.max_backups);
            let result = ctx.backup_service.create(Some(max))?;

            log_event(
                &get_logger(target),
                LogEvent::new("backup_created")
                    .with_command("backup create")
                    .with_database(&ctx.database.name),
            );

            if json {
                output::json(&result)?;
            } else {
                output::success("Backup created");
                println!("  Name: {}", result.name);
                println!("  Size: {}", result.size_display());
            }
        }
        BackupCommands::List { json } => {
            let backups = get_backup_service(target)?.list()?;

            if json {
                output::json(&backups)?;
                return Ok(());
            }

            if backups.is_empty() {
                println!("No backups found.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Name", "Created", "Size"]);

            for backup in &backups {
                table.add_row(vec![
                    backup.name.clone(),
                    backup.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    backup.size_display(),
                ]);
            }

            println!("{}", table);
        }
        BackupCommands::Restore { name, force, json } => {
            let backup_service = get_backup_service(target)?;
            if !force && !json && !confirm(format!("Restore from backup '{}'?", name))? {
                println!("Cancelled.");
                return Ok(());
            }

            backup_service.restore(&name)?;
            if json {
                println!("{}", serde_json::json!({ "restored": name }));
            } else {
                output::success(&format!("Database restored from backup: {}", name));
                println!("{}", "settings.json was not changed.".dimmed());
                println!("{}", "The previous state was saved as a pre-restore backup.".dimmed());
            }
        }
        BackupCommands::Clear { force, json } => {
            let backup_service = get_backup_service(target)?;
            if !force && !json && !confirm("Delete all backups?".to_string())? {
                println!("Cancelled.");
                return Ok(());
            }

            let result = backup_service.clear()?;
            if json {
                println!("{}", serde_json::json!({ "deleted": result.deleted }));
            } else {
                println!("Deleted {} backup(s)", result.deleted);
            }
        }
    }

    Ok(())
}
