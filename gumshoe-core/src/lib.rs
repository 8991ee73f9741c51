//! Gumshoe Core - schema migration and inspection for game databases
//!
//! - **domain**: game types, the config document, column specs, errors
//! - **adapters**: DuckDB access and schema introspection
//! - **migrations**: the target schema, declared as data
//! - **services**: migration, verification, status, backups, event log

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use adapters::duckdb::DuckDbRepository;
use config::{Config, ResolvedDatabase};
use services::*;

// Re-export commonly used types at crate root
pub use adapters::duckdb::{GameConfigRow, QueryResult, SchemaVersionRow};
pub use domain::result::Error;
pub use domain::{BackupMetadata, GameConfig, GameType, DEFAULT_GAME_CONFIG};
pub use services::{EntryPoint, LogEvent, LoggingService};

/// Options for [`GumshoeContext::migrate`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Only report what would change
    pub dry_run: bool,
    /// Do not snapshot the database before running
    pub skip_backup: bool,
}

/// Main context for Gumshoe operations
///
/// Holds the configuration, the selected database and every service bound to it.
pub struct GumshoeContext {
    pub config: Config,
    pub database: ResolvedDatabase,
    pub repository: Arc<DuckDbRepository>,
    pub migration_service: MigrationService,
    pub verify_service: VerifyService,
    pub status_service: StatusService,
    pub query_service: QueryService,
    pub backup_service: BackupService,
}

impl GumshoeContext {
    /// Open an existing database selected by `database` (name or path, see
    /// [`Config::resolve_database`])
    ///
    /// Fails with [`Error::NotFound`] when the file does not exist, so a
    /// mistyped name never leaves an empty database behind.
    pub fn new(data_dir: &Path, database: Option<&str>) -> Result<Self> {
        let config = Config::load(data_dir)?;
        let database = config.resolve_database(database)?;

        if !database.path.is_file() {
            return Err(Error::not_found(format!(
                "Database '{}' at {}",
                database.name,
                database.path.display()
            ))
            .into());
        }

        Self::open(config, database)
    }

    /// Open the selected database, creating an empty one if it does not exist yet
    pub fn create(data_dir: &Path, database: Option<&str>) -> Result<Self> {
        let config = Config::load(data_dir)?;
        let database = config.resolve_database(database)?;

        if let Some(parent) = database.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::open(config, database)
    }

    fn open(config: Config, database: ResolvedDatabase) -> Result<Self> {
        let repository = Arc::new(DuckDbRepository::new(&database.path)?);

        let migration_service = MigrationService::new(Arc::clone(&repository));
        let verify_service = VerifyService::new(Arc::clone(&repository));
        let status_service = StatusService::new(Arc::clone(&repository));
        let query_service = QueryService::new(Arc::clone(&repository));
        let backup_service =
            BackupService::new(config.data_dir.clone(), &database.name, database.path.clone());

        Ok(Self {
            config,
            database,
            repository,
            migration_service,
            verify_service,
            status_service,
            query_service,
            backup_service,
        })
    }

    /// Plan or run the game-config migration under a fresh run id
    pub fn migrate(&self, options: MigrateOptions) -> Result<MigrationReport> {
        self.migrate_as(&new_run_id(), options)
    }

    /// Plan or run the game-config migration under `run_id`
    ///
    /// A real run checks the legacy tables, takes the migration lock, snapshots
    /// the database (unless disabled) and then applies every step in one
    /// transaction. The lock is released when the run returns.
    pub fn migrate_as(&self, run_id: &str, options: MigrateOptions) -> Result<MigrationReport> {
        if options.dry_run {
            let mut plan = self.migration_service.plan()?;
            plan.run_id = run_id.to_string();
            return Ok(plan);
        }

        self.migration_service.check_preflight()?;
        let _lock = MigrationLock::acquire(&self.database.path)?;

        let backup = if self.config.backup.enabled && !options.skip_backup {
            self.repository.checkpoint()?;
            Some(self.backup_service.create(Some(self.config.backup.max_backups))?)
        } else {
            None
        };

        let mut report = self.migration_service.run_as(run_id)?;
        report.backup = backup.map(|b| b.name);
        Ok(report)
    }
}
