//! Gumshoe CLI - schema migration for game databases

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{backup, execute, logs, migrate, status, verify, Target};

/// Gumshoe - migrate and inspect game databases
#[derive(Parser)]
#[command(name = "gumshoe", version, about, long_about = None)]
struct Cli {
    /// Database name (from settings.json) or path to a .duckdb file
    #[arg(long, global = true, env = "GUMSHOE_DATABASE")]
    database: Option<String>,

    /// Data directory holding settings, backups and logs [default: ~/.gumshoe]
    #[arg(long, global = true, env = "GUMSHOE_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add game config columns, seed game types and backfill defaults
    Migrate {
        /// Show planned actions without applying them
        #[arg(long)]
        dry_run: bool,
        /// Skip the safety backup
        #[arg(long)]
        skip_backup: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute SQL against the database
    Execute {
        /// SQL to execute
        sql: Option<String>,
        /// Read SQL from file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Reject anything but a single read-only query
        #[arg(long)]
        read_only: bool,
        /// Output format
        #[arg(long, default_value = "table", value_parser = ["table", "json", "csv"])]
        format: String,
        /// Output as JSON (shorthand for --format json)
        #[arg(long)]
        json: bool,
    },

    /// Check the database against the target schema
    Verify {
        /// Show check details
        #[arg(long, short)]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show tables, config lengths per game type and schema versions
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage backups
    Backup {
        #[command(subcommand)]
        command: backup::BackupCommands,
    },

    /// View and manage the event log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Migrate { .. } => "migrate",
            Commands::Execute { .. } => "execute",
            Commands::Verify { .. } => "verify",
            Commands::Status { .. } => "status",
            Commands::Backup { .. } => "backup",
            Commands::Logs { .. } => "logs",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("Error: {:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let target = Target::new(cli.data_dir, cli.database)?;

    if !matches!(cli.command, Commands::Logs { .. }) {
        if let Some(logger) = commands::get_logger(&target) {
            let database = target.database_name();
            let _ = logger.log_command(cli.command.name(), database.as_deref());
        }
    }

    match cli.command {
        Commands::Migrate {
            dry_run,
            skip_backup,
            json,
        } => migrate::run(&target, dry_run, skip_backup, json),
        Commands::Execute {
            sql,
            file,
            read_only,
            format,
            json,
        } => {
            let fmt = if json { "json".to_string() } else { format };
            execute::run(&target, sql.as_deref(), file.as_deref(), read_only, &fmt)
        }
        Commands::Verify { verbose, json } => verify::run(&target, verbose, json),
        Commands::Status { json } => status::run(&target, json),
        Commands::Backup { command } => backup::run(&target, command),
        Commands::Logs { command } => logs::run(&target, command),
    }
}
