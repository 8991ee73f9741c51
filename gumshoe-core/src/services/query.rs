//! Query service - operator SQL against a game database

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::adapters::duckdb::{DuckDbRepository, QueryResult};

/// Query service for SQL execution
pub struct QueryService {
    repository: Arc<DuckDbRepository>,
}

impl QueryService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Run a single read-only query (introspection mode)
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        self.repository.execute_query(sql)
    }

    /// Run an inline statement or script
    pub fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.repository.execute_script(sql)
    }

    /// Run a SQL script file
    pub fn execute_file(&self, path: &Path) -> Result<QueryResult> {
        let sql = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL file {}", path.display()))?;
        self.execute(&sql)
    }
}
