//! Verify service - post-migration acceptance checks

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::adapters::duckdb::{DuckDbRepository, GameConfigRow};
use crate::domain::{GameConfig, GameType};
use crate::domain::ColumnSpec;
use crate::migrations::{
    target_columns, GAME_CONFIG_COLUMN, GAME_CONFIG_MIGRATION, GAME_DATA_TABLE,
    GAME_SESSIONS_TABLE, GAME_TYPE_COLUMN, REQUIRED_TABLES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warning,
    Error,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<serde_json::Value>>,
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            message: message.into(),
            details: None,
        }
    }

    fn warning(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warning,
            ..Self::pass(name, message)
        }
    }

    fn error(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Error,
            ..Self::pass(name, message)
        }
    }

    fn with_details(mut self, details: Vec<serde_json::Value>) -> Self {
        if !details.is_empty() {
            self.details = Some(details);
        }
        self
    }
}

#[derive(Debug, Serialize)]
pub struct VerifySummary {
    pub passed: i64,
    pub warnings: i64,
    pub errors: i64,
}

#[derive(Debug, Serialize)]
pub struct VerifyResult {
    pub checks: Vec<CheckResult>,
    pub summary: VerifySummary,
}

impl VerifyResult {
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }
}

/// Runs the acceptance checks against a game database
pub struct VerifyService {
    repository: Arc<DuckDbRepository>,
}

impl VerifyService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Run all checks, in a fixed order
    pub fn run_checks(&self) -> Result<VerifyResult> {
        let mut checks = Vec::new();

        let mut missing_tables = Vec::new();
        for table in REQUIRED_TABLES {
            if !self.repository.table_exists(table)? {
                missing_tables.push(table);
            }
        }
        checks.push(if missing_tables.is_empty() {
            CheckResult::pass("tables_present", "game_data and game_sessions exist")
        } else {
            CheckResult::error(
                "tables_present",
                format!("Missing table(s): {}", missing_tables.join(", ")),
            )
        });

        let has_game_data = !missing_tables.contains(&GAME_DATA_TABLE);
        let has_sessions = !missing_tables.contains(&GAME_SESSIONS_TABLE);

        let columns = target_columns();
        checks.push(self.check_columns("game_data_columns", GAME_DATA_TABLE, has_game_data, &columns)?);
        checks.push(self.check_columns("game_sessions_columns", GAME_SESSIONS_TABLE, has_sessions, &columns)?);

        let has_game_type =
            has_game_data && self.repository.column_exists(GAME_DATA_TABLE, GAME_TYPE_COLUMN)?;
        let rows = if has_game_type {
            Some(self.repository.get_game_configs()?)
        } else {
            None
        };
        let has_config_column =
            has_game_data && self.repository.column_exists(GAME_DATA_TABLE, GAME_CONFIG_COLUMN.name)?;

        checks.push(check_game_types_seeded(rows.as_deref()));
        checks.push(check_config_not_null(rows.as_deref(), has_config_column));
        checks.push(check_config_shape(rows.as_deref()));

        let (version, name) = GAME_CONFIG_MIGRATION;
        checks.push(if self.repository.schema_version_recorded(version)? {
            CheckResult::pass("schema_version_recorded", format!("{} is recorded", name))
        } else {
            CheckResult::warning(
                "schema_version_recorded",
                format!("{} is not recorded in schema_version", name),
            )
        });

        let count = |status| checks.iter().filter(|c| c.status == status).count() as i64;
        let summary = VerifySummary {
            passed: count(CheckStatus::Pass),
            warnings: count(CheckStatus::Warning),
            errors: count(CheckStatus::Error),
        };

        Ok(VerifyResult { checks, summary })
    }

    /// Error unless every target column of `table` exists
    fn check_columns(
        &self,
        name: &'static str,
        table: &str,
        table_present: bool,
        columns: &[ColumnSpec],
    ) -> Result<CheckResult> {
        if !table_present {
            return Ok(CheckResult::error(name, format!("Table {} is missing", table)));
        }

        let mut missing = Vec::new();
        for column in columns.iter().filter(|c| c.table == table) {
            if !self.repository.column_exists(table, column.name)? {
                missing.push(column.to_string());
            }
        }

        Ok(if missing.is_empty() {
            CheckResult::pass(name, format!("{} has all target columns", table))
        } else {
            CheckResult::error(name, format!("Missing column(s): {}", missing.join(", ")))
        })
    }
}

fn check_game_types_seeded(rows: Option<&[GameConfigRow]>) -> CheckResult {
    const NAME: &str = "game_types_seeded";
    let Some(rows) = rows else {
        return CheckResult::error(NAME, "game_data rows cannot be read");
    };

    let missing: Vec<&str> = GameType::ALL
        .iter()
        .map(|g| g.as_str())
        .filter(|g| !rows.iter().any(|r| r.game_type == *g))
        .collect();
    if !missing.is_empty() {
        return CheckResult::error(NAME, format!("No row for game type(s): {}", missing.join(", ")));
    }

    let unknown: Vec<serde_json::Value> = rows
        .iter()
        .filter(|r| r.game_type.parse::<GameType>().is_err())
        .map(|r| json!({ "game_type": r.game_type }))
        .collect();
    if !unknown.is_empty() {
        return CheckResult::warning(
            NAME,
            format!("{} row(s) have an unknown game type", unknown.len()),
        )
        .with_details(unknown);
    }

    CheckResult::pass(NAME, "noir, fantasy and cyberpunk rows exist")
}

fn check_config_not_null(rows: Option<&[GameConfigRow]>, has_column: bool) -> CheckResult {
    const NAME: &str = "game_config_not_null";
    let Some(rows) = rows else {
        return CheckResult::error(NAME, "game_data rows cannot be read");
    };
    if !has_column {
        return CheckResult::error(NAME, "game_data.game_config is missing");
    }

    let nulls: Vec<serde_json::Value> = rows
        .iter()
        .filter(|r| r.game_config.is_none())
        .map(|r| json!({ "game_type": r.game_type }))
        .collect();
    if nulls.is_empty() {
        CheckResult::pass(NAME, "Every game_data row has a config")
    } else {
        CheckResult::error(NAME, format!("{} row(s) have a NULL game_config", nulls.len()))
            .with_details(nulls)
    }
}

fn check_config_shape(rows: Option<&[GameConfigRow]>) -> CheckResult {
    const NAME: &str = "game_config_shape";
    let Some(rows) = rows else {
        return CheckResult::warning(NAME, "game_data rows cannot be read");
    };

    let mut problems = Vec::new();
    for row in rows {
        let Some(raw) = row.game_config.as_deref() else {
            continue;
        };
        match GameConfig::missing_keys(raw) {
            Ok(missing) if missing.is_empty() => {}
            Ok(missing) => problems.push(json!({
                "game_type": row.game_type,
                "missing_keys": missing,
            })),
            Err(e) => problems.push(json!({
                "game_type": row.game_type,
                "error": e.to_string(),
            })),
        }
    }

    if problems.is_empty() {
        CheckResult::pass(NAME, "Every config has worldMap, items, npcs and features")
    } else {
        CheckResult::warning(
            NAME,
            format!("{} config(s) are malformed or incomplete", problems.len()),
        )
        .with_details(problems)
    }
}
