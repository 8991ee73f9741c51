//! CLI command implementations

pub mod backup;
pub mod execute;
pub mod logs;
pub mod migrate;
pub mod status;
pub mod verify;

use std::path::PathBuf;

use anyhow::{Context, Result};
use gumshoe_core::config::Config;
use gumshoe_core::{EntryPoint, GumshoeContext, LogEvent, LoggingService};

/// Global options shared by every command
#[derive(Debug, Clone)]
pub struct Target {
    pub data_dir: PathBuf,
    /// Database name or path; None selects the configured default
    pub database: Option<String>,
}

impl Target {
    pub fn new(data_dir: Option<PathBuf>, database: Option<String>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => default_data_dir()?,
        };
        Ok(Self { data_dir, database })
    }

    /// Resolved instance name for the event log (never the file path)
    pub fn database_name(&self) -> Option<String> {
        Config::load(&self.data_dir)
            .and_then(|config| config.resolve_database(self.database.as_deref()))
            .map(|db| db.name)
            .ok()
    }
}

/// `~/.gumshoe`
fn default_data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".gumshoe"))
        .context("Could not find home directory; set GUMSHOE_DIR or pass --data-dir")
}

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger(target: &Target) -> Option<LoggingService> {
    std::fs::create_dir_all(&target.data_dir).ok()?;
    LoggingService::new(&target.data_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Open the selected database with every service bound to it
///
/// The database file must already exist.
pub fn get_context(target: &Target) -> Result<GumshoeContext> {
    ensure_data_dir(target)?;
    GumshoeContext::new(&target.data_dir, target.database.as_deref())
        .context("Failed to open game database")
}

/// Like [`get_context`], but creates an empty database when none exists
pub fn get_or_create_context(target: &Target) -> Result<GumshoeContext> {
    ensure_data_dir(target)?;
    GumshoeContext::create(&target.data_dir, target.database.as_deref())
        .context("Failed to open game database")
}

fn ensure_data_dir(target: &Target) -> Result<()> {
    std::fs::create_dir_all(&target.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            target.data_dir.display()
        )
    })
}
