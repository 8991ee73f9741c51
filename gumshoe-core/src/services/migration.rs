//! Migration service - brings a legacy game database to the target schema
//!
//! The migration is a fixed sequence of steps:
//!
//! 1. add `game_data.game_config`
//! 2. add `game_sessions.session_data`
//! 3. add `game_sessions.created_at` / `updated_at` (default now, NULLs backfilled)
//! 4. seed one `game_data` row per game type (never overwrites)
//! 5. backfill NULL `game_config` values with the default document
//!
//! Every step checks the live schema before acting, so a second run reports
//! everything as skipped. A run executes inside one transaction: if any step
//! fails, none of them stick.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::duckdb::{self as db, DuckDbRepository};
use crate::domain::result::Error;
use crate::domain::{ColumnSpec, GameType, DEFAULT_GAME_CONFIG};
use crate::migrations::{
    GAME_CONFIG_COLUMN, GAME_CONFIG_MIGRATION, GAME_DATA_TABLE, GAME_TYPE_COLUMN, REQUIRED_TABLES,
    SESSION_DATA_COLUMN, SESSION_TIMESTAMP_COLUMNS,
};

/// What a single action does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    AddColumn,
    SetDefault,
    BackfillTimestamp,
    SeedRow,
    BackfillConfig,
}

/// Outcome of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Dry run: would be executed
    Pending,
    Applied,
    Skipped,
}

/// One planned or executed action
#[derive(Debug, Clone, Serialize)]
pub struct MigrationAction {
    /// Step number (1-5)
    pub step: u8,
    pub kind: ActionKind,
    /// Column or row the action targets, e.g. `game_data.game_config`
    pub target: String,
    pub sql: String,
    pub status: ActionStatus,
    pub detail: String,
    /// Rows written (applied) or expected to be written (pending)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<usize>,
}

impl MigrationAction {
    fn new(step: u8, kind: ActionKind, target: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            target: target.into(),
            sql: sql.into(),
            status: ActionStatus::Pending,
            detail: String::new(),
            rows_affected: None,
        }
    }

    fn pending(mut self, detail: impl Into<String>, rows: Option<usize>) -> Self {
        self.status = ActionStatus::Pending;
        self.detail = detail.into();
        self.rows_affected = rows;
        self
    }

    fn applied(mut self, detail: impl Into<String>, rows: Option<usize>) -> Self {
        self.status = ActionStatus::Applied;
        self.detail = detail.into();
        self.rows_affected = rows;
        self
    }

    fn skipped(mut self, detail: impl Into<String>) -> Self {
        self.status = ActionStatus::Skipped;
        self.detail = detail.into();
        self.rows_affected = None;
        self
    }

    /// Applied, or pending in a dry run
    pub fn is_change(&self) -> bool {
        self.status != ActionStatus::Skipped
    }
}

/// Result of planning or running the migration
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub actions: Vec<MigrationAction>,
    /// `table.column` for every column added (or to be added)
    pub columns_added: Vec<String>,
    pub rows_seeded: usize,
    pub configs_backfilled: usize,
    pub timestamps_backfilled: usize,
    /// The migration was already recorded in `schema_version` before this run
    pub already_recorded: bool,
    /// This run wrote the `schema_version` record
    pub version_recorded: bool,
    /// Name of the safety backup taken before the run, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
}

impl MigrationReport {
    fn new(run_id: String, dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            dry_run,
            started_at,
            duration_ms: 0,
            actions: Vec::new(),
            columns_added: Vec::new(),
            rows_seeded: 0,
            configs_backfilled: 0,
            timestamps_backfilled: 0,
            already_recorded: false,
            version_recorded: false,
            backup: None,
        }
    }

    fn summarize(&mut self) {
        let changes = || self.actions.iter().filter(|a| a.is_change());

        self.columns_added = changes()
            .filter(|a| a.kind == ActionKind::AddColumn)
            .map(|a| a.target.clone())
            .collect();
        self.rows_seeded = changes().filter(|a| a.kind == ActionKind::SeedRow).count();
        self.configs_backfilled = changes()
            .filter(|a| a.kind == ActionKind::BackfillConfig)
            .filter_map(|a| a.rows_affected)
            .sum();
        self.timestamps_backfilled = changes()
            .filter(|a| a.kind == ActionKind::BackfillTimestamp)
            .filter_map(|a| a.rows_affected)
            .sum();
    }

    /// Count of actions that changed (or would change) something
    pub fn change_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_change()).count()
    }

    /// True when the database already matched the target schema
    pub fn is_noop(&self) -> bool {
        self.change_count() == 0
    }
}

/// Identifier shared by the `schema_version` row and every log event of one run
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Service for the game-config schema migration
pub struct MigrationService {
    repository: Arc<DuckDbRepository>,
}

impl MigrationService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Inspect the database and report what a run would do, without changing anything
    pub fn plan(&self) -> Result<MigrationReport> {
        let started = Instant::now();
        let mut report = MigrationReport::new(new_run_id(), true, Utc::now());

        self.repository.with_connection(|conn| {
            preflight(conn)?;
            report.actions = execute_steps(conn, true)?;
            report.already_recorded = db::schema_version_recorded(conn, GAME_CONFIG_MIGRATION.0)?;
            Ok(())
        })?;

        report.summarize();
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Run the migration under a fresh run id
    pub fn run(&self) -> Result<MigrationReport> {
        self.run_as(&new_run_id())
    }

    /// Run the migration inside a single transaction
    ///
    /// Fails with [`Error::Schema`] before touching anything if the legacy
    /// tables are missing. Any failing step rolls back the whole run.
    /// `run_id` is stored in `schema_version` and returned in the report.
    pub fn run_as(&self, run_id: &str) -> Result<MigrationReport> {
        let started = Instant::now();
        let mut report = MigrationReport::new(run_id.to_string(), false, Utc::now());

        let (actions, already_recorded, version_recorded) =
            self.repository.with_transaction(|tx| {
                preflight(tx)?;
                let already_recorded = db::schema_version_recorded(tx, GAME_CONFIG_MIGRATION.0)?;
                let actions = execute_steps(tx, false)?;

                db::ensure_schema_version_table(tx)?;
                let (version, name) = GAME_CONFIG_MIGRATION;
                let version_recorded = db::record_schema_version(tx, version, name, run_id)?;

                Ok((actions, already_recorded, version_recorded))
            })?;

        report.actions = actions;
        report.already_recorded = already_recorded;
        report.version_recorded = version_recorded;
        report.summarize();
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Check the legacy tables without changing anything
    pub fn check_preflight(&self) -> Result<()> {
        self.repository.with_connection(preflight)
    }

    /// Whether this migration has been recorded as complete
    pub fn is_recorded(&self) -> Result<bool> {
        self.repository.schema_version_recorded(GAME_CONFIG_MIGRATION.0)
    }
}

/// Check the legacy structure the migration builds on
fn preflight(conn: &Connection) -> Result<()> {
    for table in REQUIRED_TABLES {
        if !db::table_exists(conn, table)? {
            return Err(Error::schema(format!("table {} not found", table)).into());
        }
    }
    if !db::column_exists(conn, GAME_DATA_TABLE, GAME_TYPE_COLUMN)? {
        return Err(Error::schema(format!(
            "{}.{} not found; cannot identify game rows",
            GAME_DATA_TABLE, GAME_TYPE_COLUMN
        ))
        .into());
    }
    Ok(())
}

/// Walk every step in order. With `dry_run`, only introspect.
fn execute_steps(conn: &Connection, dry_run: bool) -> Result<Vec<MigrationAction>> {
    let mut actions = Vec::new();

    // Steps 1-2: plain columns
    actions.push(ensure_column(conn, 1, &GAME_CONFIG_COLUMN, dry_run)?);
    actions.push(ensure_column(conn, 2, &SESSION_DATA_COLUMN, dry_run)?);

    // Step 3: timestamps. All ALTERs on game_sessions run before its UPDATEs.
    let mut added = Vec::new();
    for spec in &SESSION_TIMESTAMP_COLUMNS {
        let action = ensure_column(conn, 3, spec, dry_run)?;
        if action.is_change() {
            added.push(*spec);
        }
        actions.push(action);
    }
    for spec in &added {
        actions.push(set_default(conn, spec, dry_run)?);
    }
    for spec in &SESSION_TIMESTAMP_COLUMNS {
        let column_added = added.contains(spec);
        actions.push(backfill_timestamp(conn, spec, column_added, dry_run)?);
    }

    // Step 4: seed rows
    for game_type in GameType::ALL {
        actions.push(seed_game_type(conn, game_type, dry_run)?);
    }

    // Step 5: backfill NULL configs on rows that pre-existed
    actions.push(backfill_configs(conn, dry_run)?);

    Ok(actions)
}

fn ensure_column(
    conn: &Connection,
    step: u8,
    spec: &ColumnSpec,
    dry_run: bool,
) -> Result<MigrationAction> {
    let action = MigrationAction::new(step, ActionKind::AddColumn, spec.to_string(), spec.add_column_sql());

    if db::column_exists(conn, spec.table, spec.name)? {
        return Ok(action.skipped("column already exists"));
    }
    if dry_run {
        return Ok(action.pending("column missing", None));
    }

    db::add_column(conn, spec).with_context(|| format!("Step {} failed", step))?;
    Ok(action.applied("column added", None))
}

fn set_default(conn: &Connection, spec: &ColumnSpec, dry_run: bool) -> Result<MigrationAction> {
    let sql = spec.set_default_sql().unwrap_or_default();
    let action = MigrationAction::new(3, ActionKind::SetDefault, spec.to_string(), sql);

    if dry_run {
        return Ok(action.pending("new column gets default", None));
    }
    db::set_column_default(conn, spec).context("Step 3 failed")?;
    Ok(action.applied("default set", None))
}

fn backfill_timestamp(
    conn: &Connection,
    spec: &ColumnSpec,
    column_added: bool,
    dry_run: bool,
) -> Result<MigrationAction> {
    let sql = spec.backfill_sql().unwrap_or_default();
    let action = MigrationAction::new(3, ActionKind::BackfillTimestamp, spec.to_string(), sql);

    if dry_run {
        // A column that does not exist yet will be NULL on every existing row
        let nulls = if column_added {
            db::count_rows(conn, spec.table)?
        } else {
            db::count_nulls(conn, spec.table, spec.name)?
        };
        if nulls == 0 {
            return Ok(action.skipped("no NULL values"));
        }
        return Ok(action.pending("existing rows get migration time", Some(nulls as usize)));
    }

    let updated = db::backfill_column_default(conn, spec).context("Step 3 failed")?;
    if updated == 0 {
        return Ok(action.skipped("no NULL values"));
    }
    Ok(action.applied("existing rows set to migration time", Some(updated)))
}

fn seed_game_type(conn: &Connection, game_type: GameType, dry_run: bool) -> Result<MigrationAction> {
    let sql = format!(
        "INSERT INTO {table} (game_type, game_config) SELECT '{gt}', '{cfg}' \
         WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE game_type = '{gt}')",
        table = GAME_DATA_TABLE,
        gt = game_type,
        cfg = DEFAULT_GAME_CONFIG
    );
    let target = format!("{}[{}]", GAME_DATA_TABLE, game_type);
    let action = MigrationAction::new(4, ActionKind::SeedRow, target, sql);

    if db::game_type_exists(conn, game_type)? {
        return Ok(action.skipped("row already exists"));
    }
    if dry_run {
        return Ok(action.pending("row missing", Some(1)));
    }

    let inserted = db::insert_game_config_if_absent(conn, game_type, DEFAULT_GAME_CONFIG)
        .context("Step 4 failed")?;
    if inserted {
        Ok(action.applied("row seeded with default config", Some(1)))
    } else {
        Ok(action.skipped("row already exists"))
    }
}

fn backfill_configs(conn: &Connection, dry_run: bool) -> Result<MigrationAction> {
    let sql = format!(
        "UPDATE {} SET game_config = '{}' WHERE game_config IS NULL",
        GAME_DATA_TABLE, DEFAULT_GAME_CONFIG
    );
    let target = GAME_CONFIG_COLUMN.to_string();
    let action = MigrationAction::new(5, ActionKind::BackfillConfig, target, sql);

    if dry_run {
        let nulls = if db::column_exists(conn, GAME_DATA_TABLE, GAME_CONFIG_COLUMN.name)? {
            db::count_nulls(conn, GAME_DATA_TABLE, GAME_CONFIG_COLUMN.name)?
        } else {
            db::count_rows(conn, GAME_DATA_TABLE)?
        };
        if nulls == 0 {
            return Ok(action.skipped("no NULL configs"));
        }
        return Ok(action.pending("rows get default config", Some(nulls as usize)));
    }

    let updated = db::backfill_null_game_configs(conn, DEFAULT_GAME_CONFIG).context("Step 5 failed")?;
    if updated == 0 {
        return Ok(action.skipped("no NULL configs"));
    }
    Ok(action.applied("NULL configs set to default", Some(updated)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_repo(setup_sql: &str) -> Arc<DuckDbRepository> {
        let repo = DuckDbRepository::open_in_memory().unwrap();
        repo.with_connection(|conn| {
            conn.execute_batch(setup_sql)?;
            Ok(())
        })
        .unwrap();
        Arc::new(repo)
    }

    const BARE_TABLES: &str = "
        CREATE TABLE game_data (game_type VARCHAR);
        CREATE TABLE game_sessions (id INTEGER, player VARCHAR);
    ";

    #[test]
    fn test_plan_lists_every_step_on_bare_tables() {
        let repo = legacy_repo(BARE_TABLES);
        let service = MigrationService::new(Arc::clone(&repo));

        let report = service.plan().unwrap();
        assert!(report.dry_run);
        assert_eq!(
            report.columns_added,
            vec![
                "game_data.game_config",
                "game_sessions.session_data",
                "game_sessions.created_at",
                "game_sessions.updated_at",
            ]
        );
        assert_eq!(report.rows_seeded, 3);
        assert!(report
            .actions
            .iter()
            .all(|a| a.status != ActionStatus::Applied));

        // Nothing changed
        assert!(!repo.column_exists("game_data", "game_config").unwrap());
        assert!(repo.get_game_configs().unwrap().is_empty());
    }

    #[test]
    fn test_steps_are_ordered() {
        let repo = legacy_repo(BARE_TABLES);
        let report = MigrationService::new(repo).run().unwrap();

        let steps: Vec<u8> = report.actions.iter().map(|a| a.step).collect();
        let mut sorted = steps.clone();
        sorted.sort();
        assert_eq!(steps, sorted);
    }

    #[test]
    fn test_preflight_requires_game_type_column() {
        let repo = legacy_repo(
            "CREATE TABLE game_data (name VARCHAR);
             CREATE TABLE game_sessions (id INTEGER);",
        );
        let err = MigrationService::new(repo).run().unwrap_err();
        let schema_err = err.downcast_ref::<Error>();
        assert!(matches!(schema_err, Some(Error::Schema(_))));
        assert!(err.to_string().contains("game_data.game_type"));
    }

    #[test]
    fn test_set_default_only_for_added_columns() {
        let repo = legacy_repo(
            "CREATE TABLE game_data (game_type VARCHAR, game_config TEXT);
             CREATE TABLE game_sessions (id INTEGER, created_at TIMESTAMP);
             INSERT INTO game_sessions VALUES (1, NULL);",
        );
        let report = MigrationService::new(Arc::clone(&repo)).run().unwrap();

        let defaults: Vec<&str> = report
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::SetDefault)
            .map(|a| a.target.as_str())
            .collect();
        assert_eq!(defaults, vec!["game_sessions.updated_at"]);

        // Pre-existing created_at still gets its NULL filled
        assert_eq!(report.timestamps_backfilled, 2);
        assert_eq!(repo.count_nulls("game_sessions", "created_at").unwrap(), 0);
    }
}
