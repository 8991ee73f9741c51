//! Migration scenario tests against real DuckDB files
//!
//! Run with: cargo test --test migration_tests -- --nocapture

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use gumshoe_core::adapters::duckdb::DuckDbRepository;
use gumshoe_core::services::{
    ActionKind, ActionStatus, MigrationLock, MigrationService, VerifyService,
};
use gumshoe_core::{Error, GumshoeContext, MigrateOptions, DEFAULT_GAME_CONFIG};

// ============================================================================
// Test Helpers
// ============================================================================

const LEGACY_SCHEMA: &str = "
    CREATE TABLE game_data (game_type VARCHAR);
    CREATE TABLE game_sessions (id INTEGER, player VARCHAR);
";

/// Create a database file with the given setup SQL
fn create_legacy_repo(temp_dir: &TempDir, setup_sql: &str) -> Arc<DuckDbRepository> {
    let db_path = temp_dir.path().join("game.duckdb");
    let repo = DuckDbRepository::new(&db_path).expect("Failed to create repository");
    repo.with_connection(|conn| {
        conn.execute_batch(setup_sql)?;
        Ok(())
    })
    .expect("Failed to create legacy tables");
    Arc::new(repo)
}

fn configs(repo: &DuckDbRepository) -> Vec<(String, Option<String>)> {
    repo.get_game_configs()
        .unwrap()
        .into_iter()
        .map(|r| (r.game_type, r.game_config))
        .collect()
}

fn scalar_i64(repo: &DuckDbRepository, sql: &str) -> i64 {
    repo.with_connection(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
        .unwrap()
}

/// Write the legacy schema into `<dir>/<name>.duckdb` and close it
fn seed_database_file(dir: &Path, name: &str, setup_sql: &str) {
    let repo = DuckDbRepository::new(&dir.join(format!("{}.duckdb", name))).unwrap();
    repo.with_connection(|conn| {
        conn.execute_batch(setup_sql)?;
        Ok(())
    })
    .unwrap();
}

// ============================================================================
// Seeding and backfill
// ============================================================================

#[test]
fn test_bare_tables_get_three_default_rows() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(&temp_dir, LEGACY_SCHEMA);

    MigrationService::new(Arc::clone(&repo)).run().unwrap();

    let default = Some(DEFAULT_GAME_CONFIG.to_string());
    assert_eq!(
        configs(&repo),
        vec![
            ("cyberpunk".to_string(), default.clone()),
            ("fantasy".to_string(), default.clone()),
            ("noir".to_string(), default),
        ]
    );
}

#[test]
fn test_existing_config_is_never_overwritten() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(
        &temp_dir,
        r#"
        CREATE TABLE game_data (game_type VARCHAR, game_config TEXT);
        CREATE TABLE game_sessions (id INTEGER);
        INSERT INTO game_data VALUES ('noir', '{"worldMap": {"x":1}}');
        "#,
    );

    let report = MigrationService::new(Arc::clone(&repo)).run().unwrap();
    assert_eq!(report.rows_seeded, 2);
    assert_eq!(report.configs_backfilled, 0);

    let rows = configs(&repo);
    assert_eq!(rows.len(), 3);
    assert!(rows.contains(&("noir".to_string(), Some(r#"{"worldMap": {"x":1}}"#.to_string()))));
    assert!(rows.contains(&("fantasy".to_string(), Some(DEFAULT_GAME_CONFIG.to_string()))));
    assert!(rows.contains(&("cyberpunk".to_string(), Some(DEFAULT_GAME_CONFIG.to_string()))));
}

#[test]
fn test_null_configs_are_backfilled_with_literal_default() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(
        &temp_dir,
        "
        CREATE TABLE game_data (game_type VARCHAR, game_config TEXT);
        CREATE TABLE game_sessions (id INTEGER);
        INSERT INTO game_data VALUES ('noir', NULL), ('fantasy', NULL), ('legacy', NULL);
        ",
    );

    let report = MigrationService::new(Arc::clone(&repo)).run().unwrap();
    assert_eq!(report.configs_backfilled, 3);
    assert_eq!(report.rows_seeded, 1);

    for (_, config) in configs(&repo) {
        assert_eq!(config.as_deref(), Some(DEFAULT_GAME_CONFIG));
    }
}

#[test]
fn test_rows_without_config_column_are_backfilled() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(
        &temp_dir,
        "
        CREATE TABLE game_data (game_type VARCHAR);
        CREATE TABLE game_sessions (id INTEGER);
        INSERT INTO game_data VALUES ('noir');
        ",
    );

    let report = MigrationService::new(Arc::clone(&repo)).run().unwrap();
    assert_eq!(report.rows_seeded, 2);
    assert_eq!(report.configs_backfilled, 1);
    assert_eq!(scalar_i64(&repo, "SELECT COUNT(*) FROM game_data"), 3);
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn test_second_run_skips_everything() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(&temp_dir, LEGACY_SCHEMA);
    let service = MigrationService::new(Arc::clone(&repo));

    let first = service.run().unwrap();
    assert!(first.version_recorded);
    assert!(!first.already_recorded);
    let before = configs(&repo);

    let second = service.run().unwrap();
    assert!(second.is_noop());
    assert!(second
        .actions
        .iter()
        .all(|a| a.status == ActionStatus::Skipped));
    assert!(second.already_recorded);
    assert!(!second.version_recorded);
    assert_eq!(configs(&repo), before);
    assert_eq!(scalar_i64(&repo, "SELECT COUNT(*) FROM game_data"), 3);
    assert_eq!(repo.get_schema_versions().unwrap().len(), 1);
}

#[test]
fn test_all_target_columns_exist_after_first_run() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(&temp_dir, LEGACY_SCHEMA);

    MigrationService::new(Arc::clone(&repo)).run().unwrap();

    assert!(repo.column_exists("game_data", "game_config").unwrap());
    for column in ["session_data", "created_at", "updated_at"] {
        assert!(repo.column_exists("game_sessions", column).unwrap(), "{}", column);
    }

    let created = repo
        .list_columns("game_sessions")
        .unwrap()
        .into_iter()
        .find(|c| c.name == "created_at")
        .unwrap();
    assert_eq!(created.data_type, "TIMESTAMP");
    assert!(created.default.is_some());
}

// ============================================================================
// Timestamps
// ============================================================================

#[test]
fn test_session_timestamps_backfilled_and_defaulted() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(
        &temp_dir,
        "
        CREATE TABLE game_data (game_type VARCHAR);
        CREATE TABLE game_sessions (id INTEGER, player VARCHAR);
        INSERT INTO game_sessions VALUES (1, 'sam'), (2, 'vera');
        ",
    );

    let report = MigrationService::new(Arc::clone(&repo)).run().unwrap();
    assert_eq!(report.timestamps_backfilled, 4);
    assert_eq!(repo.count_nulls("game_sessions", "created_at").unwrap(), 0);
    assert_eq!(repo.count_nulls("game_sessions", "updated_at").unwrap(), 0);

    repo.execute_script("INSERT INTO game_sessions (id, player) VALUES (3, 'nick')")
        .unwrap();
    assert_eq!(
        scalar_i64(
            &repo,
            "SELECT COUNT(*) FROM game_sessions WHERE id = 3 AND created_at IS NOT NULL AND updated_at IS NOT NULL"
        ),
        1
    );
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_failing_step_rolls_back_earlier_steps() {
    let temp_dir = TempDir::new().unwrap();
    // Seeding fails: `owner` is NOT NULL and the seed insert leaves it empty
    let repo = create_legacy_repo(
        &temp_dir,
        "
        CREATE TABLE game_data (game_type VARCHAR, owner VARCHAR NOT NULL);
        CREATE TABLE game_sessions (id INTEGER);
        ",
    );

    let err = MigrationService::new(Arc::clone(&repo)).run().unwrap_err();
    assert!(format!("{:#}", err).contains("Step 4"));

    assert!(!repo.column_exists("game_data", "game_config").unwrap());
    assert!(!repo.column_exists("game_sessions", "session_data").unwrap());
    assert!(!repo.column_exists("game_sessions", "created_at").unwrap());
    assert!(!repo.table_exists("schema_version").unwrap());
}

#[test]
fn test_preflight_rejects_missing_sessions_table() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(&temp_dir, "CREATE TABLE game_data (game_type VARCHAR);");

    let err = MigrationService::new(Arc::clone(&repo)).run().unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Schema(_))));
    assert!(err.to_string().contains("game_sessions"));

    assert!(!repo.column_exists("game_data", "game_config").unwrap());
    assert!(!repo.table_exists("schema_version").unwrap());
}

// ============================================================================
// Dry run
// ============================================================================

#[test]
fn test_dry_run_changes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(
        &temp_dir,
        "
        CREATE TABLE game_data (game_type VARCHAR);
        CREATE TABLE game_sessions (id INTEGER);
        INSERT INTO game_sessions VALUES (1);
        ",
    );

    let plan = MigrationService::new(Arc::clone(&repo)).plan().unwrap();
    assert!(plan.dry_run);
    assert_eq!(plan.columns_added.len(), 4);
    assert_eq!(plan.rows_seeded, 3);
    assert_eq!(plan.timestamps_backfilled, 2);
    assert!(plan
        .actions
        .iter()
        .any(|a| a.kind == ActionKind::SetDefault && a.status == ActionStatus::Pending));

    assert!(!repo.column_exists("game_data", "game_config").unwrap());
    assert!(!repo.column_exists("game_sessions", "created_at").unwrap());
    assert_eq!(scalar_i64(&repo, "SELECT COUNT(*) FROM game_data"), 0);
    assert!(!repo.table_exists("schema_version").unwrap());
}

// ============================================================================
// Verification
// ============================================================================

#[test]
fn test_verify_before_and_after_migration() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(&temp_dir, LEGACY_SCHEMA);
    let verify = VerifyService::new(Arc::clone(&repo));

    let before = verify.run_checks().unwrap();
    assert!(before.has_errors());

    MigrationService::new(Arc::clone(&repo)).run().unwrap();

    let after = verify.run_checks().unwrap();
    assert!(!after.has_errors());
    assert_eq!(after.summary.warnings, 0);
}

// ============================================================================
// Context: lock, backup, persistence
// ============================================================================

#[test]
fn test_migrate_through_context_takes_backup() {
    let temp_dir = TempDir::new().unwrap();
    seed_database_file(temp_dir.path(), "staging", LEGACY_SCHEMA);

    let context = GumshoeContext::new(temp_dir.path(), Some("staging")).unwrap();
    let report = context.migrate(MigrateOptions::default()).unwrap();

    let backup_name = report.backup.expect("backup should be taken");
    let backups = context.backup_service.list().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].name, backup_name);
}

#[test]
fn test_migrate_skip_backup_and_dry_run() {
    let temp_dir = TempDir::new().unwrap();
    seed_database_file(temp_dir.path(), "qa", LEGACY_SCHEMA);

    let context = GumshoeContext::new(temp_dir.path(), Some("qa")).unwrap();

    let plan = context
        .migrate(MigrateOptions { dry_run: true, skip_backup: false })
        .unwrap();
    assert!(plan.backup.is_none());
    assert!(!context.repository.column_exists("game_data", "game_config").unwrap());

    let report = context
        .migrate(MigrateOptions { dry_run: false, skip_backup: true })
        .unwrap();
    assert!(report.backup.is_none());
    assert!(context.backup_service.list().unwrap().is_empty());
}

#[test]
fn test_migrate_rejected_while_locked() {
    let temp_dir = TempDir::new().unwrap();
    seed_database_file(temp_dir.path(), "prod", LEGACY_SCHEMA);

    let context = GumshoeContext::new(temp_dir.path(), Some("prod")).unwrap();
    let _held = MigrationLock::acquire(&context.database.path).unwrap();

    let err = context
        .migrate(MigrateOptions { dry_run: false, skip_backup: true })
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Locked(_))));
    assert!(!context.repository.column_exists("game_data", "game_config").unwrap());
}

#[test]
fn test_migration_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    seed_database_file(temp_dir.path(), "game", LEGACY_SCHEMA);

    {
        let context = GumshoeContext::new(temp_dir.path(), Some("game")).unwrap();
        context
            .migrate(MigrateOptions { dry_run: false, skip_backup: true })
            .unwrap();
    }

    let context = GumshoeContext::new(temp_dir.path(), Some("game")).unwrap();
    assert!(context.migration_service.is_recorded().unwrap());
    let status = context.status_service.get_status().unwrap();
    assert_eq!(status.games.len(), 3);
    assert!(status.database_size.unwrap_or(0) > 0);
}

// ============================================================================
// Persisted layout with a unique game_type
// ============================================================================

const UNIQUE_LAYOUT: &str = "
    CREATE TABLE game_data (game_type TEXT UNIQUE, game_config TEXT);
    CREATE TABLE game_sessions (id INTEGER, game_type TEXT);
";

#[test]
fn test_unique_layout_seeds_three_defaults_once() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(&temp_dir, UNIQUE_LAYOUT);
    let service = MigrationService::new(Arc::clone(&repo));

    let first = service.run().unwrap();
    assert_eq!(first.rows_seeded, 3);

    let second = service.run().unwrap();
    assert_eq!(second.rows_seeded, 0);
    assert!(second.is_noop());

    let default = Some(DEFAULT_GAME_CONFIG.to_string());
    assert_eq!(
        configs(&repo),
        vec![
            ("cyberpunk".to_string(), default.clone()),
            ("fantasy".to_string(), default.clone()),
            ("noir".to_string(), default),
        ]
    );
}

#[test]
fn test_unique_layout_keeps_existing_noir_config() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_legacy_repo(
        &temp_dir,
        &format!(
            "{}{}",
            UNIQUE_LAYOUT,
            r#"INSERT INTO game_data VALUES ('noir', '{"worldMap": {"x":1}}'), ('fantasy', NULL);"#
        ),
    );

    let report = MigrationService::new(Arc::clone(&repo)).run().unwrap();
    assert_eq!(report.rows_seeded, 1);
    assert_eq!(report.configs_backfilled, 1);

    let rows = configs(&repo);
    assert_eq!(rows.len(), 3);
    assert!(rows.contains(&("noir".to_string(), Some(r#"{"worldMap": {"x":1}}"#.to_string()))));
    assert!(rows.contains(&("fantasy".to_string(), Some(DEFAULT_GAME_CONFIG.to_string()))));
    assert!(rows.contains(&("cyberpunk".to_string(), Some(DEFAULT_GAME_CONFIG.to_string()))));
}

// ============================================================================
// Database selection and run ids
// ============================================================================

#[test]
fn test_missing_database_is_not_created() {
    let temp_dir = TempDir::new().unwrap();

    let err = GumshoeContext::new(temp_dir.path(), Some("typo")).err().unwrap();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NotFound(_))));
    assert!(!temp_dir.path().join("typo.duckdb").exists());

    let context = GumshoeContext::create(temp_dir.path(), Some("fresh")).unwrap();
    assert!(context.database.path.exists());
}

#[test]
fn test_run_id_is_recorded_with_schema_version() {
    let temp_dir = TempDir::new().unwrap();
    seed_database_file(temp_dir.path(), "game", LEGACY_SCHEMA);

    let context = GumshoeContext::new(temp_dir.path(), Some("game")).unwrap();
    let report = context
        .migrate_as("run-42", MigrateOptions { dry_run: false, skip_backup: true })
        .unwrap();

    assert_eq!(report.run_id, "run-42");
    let versions = context.repository.get_schema_versions().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].run_id, "run-42");
}

#[test]
fn test_backups_stay_with_their_database() {
    let temp_dir = TempDir::new().unwrap();
    seed_database_file(temp_dir.path(), "prod", LEGACY_SCHEMA);
    seed_database_file(temp_dir.path(), "staging", LEGACY_SCHEMA);

    let prod = GumshoeContext::new(temp_dir.path(), Some("prod")).unwrap();
    let prod_report = prod.migrate(MigrateOptions::default()).unwrap();

    let staging = GumshoeContext::new(temp_dir.path(), Some("staging")).unwrap();
    staging.migrate(MigrateOptions::default()).unwrap();

    let prod_backups: Vec<String> = prod
        .backup_service
        .list()
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(prod_backups, vec![prod_report.backup.unwrap()]);
    assert_eq!(staging.backup_service.list().unwrap().len(), 1);
}
