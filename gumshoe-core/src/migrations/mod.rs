//! Target schema for the game database
//!
//! The game-config migration is declared here as data: the tables it builds
//! on, the columns it guarantees and the version it records once complete.
//! The steps themselves run in `services::migration`.

use crate::domain::{ColumnDefault, ColumnSpec};

/// Bootstrap for the `schema_version` tracking table, embedded at compile time
pub const SCHEMA_VERSION_SQL: &str = include_str!("000_schema_version.sql");

pub const GAME_DATA_TABLE: &str = "game_data";
pub const GAME_SESSIONS_TABLE: &str = "game_sessions";

/// Tables that must exist before the migration can run
pub const REQUIRED_TABLES: [&str; 2] = [GAME_DATA_TABLE, GAME_SESSIONS_TABLE];

/// Unique key column of `game_data`; must already exist
pub const GAME_TYPE_COLUMN: &str = "game_type";

/// Version and name recorded in `schema_version` after a successful run
pub const GAME_CONFIG_MIGRATION: (i64, &str) = (2, "002_game_config_columns");

pub const GAME_CONFIG_COLUMN: ColumnSpec = ColumnSpec::new(GAME_DATA_TABLE, "game_config", "TEXT");

pub const SESSION_DATA_COLUMN: ColumnSpec =
    ColumnSpec::new(GAME_SESSIONS_TABLE, "session_data", "TEXT");

pub const SESSION_TIMESTAMP_COLUMNS: [ColumnSpec; 2] = [
    ColumnSpec::new(GAME_SESSIONS_TABLE, "created_at", "TIMESTAMP")
        .with_default(ColumnDefault::CurrentTimestamp),
    ColumnSpec::new(GAME_SESSIONS_TABLE, "updated_at", "TIMESTAMP")
        .with_default(ColumnDefault::CurrentTimestamp),
];

/// Every column the migration guarantees, in the order they are added
pub fn target_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![GAME_CONFIG_COLUMN, SESSION_DATA_COLUMN];
    columns.extend(SESSION_TIMESTAMP_COLUMNS);
    columns
}
