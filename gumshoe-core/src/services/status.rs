//! Status service - tables, per-game config lengths and version history

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::adapters::duckdb::{DuckDbRepository, SchemaVersionRow};
use crate::migrations::{GAME_DATA_TABLE, GAME_TYPE_COLUMN};

pub struct StatusService {
    repository: Arc<DuckDbRepository>,
}

impl StatusService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    pub fn get_status(&self) -> Result<StatusSummary> {
        let tables = self.repository.list_tables()?;

        let has_game_rows = tables.iter().any(|t| t == GAME_DATA_TABLE)
            && self.repository.column_exists(GAME_DATA_TABLE, GAME_TYPE_COLUMN)?;
        let games = if has_game_rows {
            self.repository
                .get_game_configs()?
                .into_iter()
                .map(|row| GameSummary {
                    game_type: row.game_type,
                    config_length: row.config_length,
                })
                .collect()
        } else {
            Vec::new()
        };

        let schema_versions = self.repository.get_schema_versions()?;
        let database_size = match self.repository.db_path() {
            Some(_) => Some(self.repository.get_db_size()?),
            None => None,
        };

        Ok(StatusSummary {
            tables,
            games,
            schema_versions,
            database_size,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub tables: Vec<String>,
    pub games: Vec<GameSummary>,
    pub schema_versions: Vec<SchemaVersionRow>,
    /// File size in bytes (None for in-memory databases)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct GameSummary {
    pub game_type: String,
    /// Length of the stored config text; None when NULL
    pub config_length: Option<i64>,
}
