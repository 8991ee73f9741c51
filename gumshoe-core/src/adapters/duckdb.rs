//! DuckDB repository implementation
//!
//! Schema introspection and the DDL/DML primitives used by the migration are
//! free functions over `&Connection`, so they run unchanged inside a
//! transaction (see [`DuckDbRepository::with_transaction`]). The repository
//! methods are thin locked wrappers for use outside one.

use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use duckdb::{params, Connection, OptionalExt};
use regex::Regex;
use serde::Serialize;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use crate::domain::result::Error;
use crate::domain::{ColumnInfo, ColumnSpec, GameType};
use crate::migrations::{GAME_DATA_TABLE, SCHEMA_VERSION_SQL};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Schema used when a table name carries no `schema.` prefix
const DEFAULT_SCHEMA: &str = "main";

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

static SQL_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid type regex"));

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
        || lower.contains("could not set lock on file")
}

/// Validate SQL syntax before execution to catch malformed scripts early.
///
/// Returns the number of statements in the script.
fn validate_sql_syntax(sql: &str) -> Result<usize> {
    let dialect = DuckDbDialect {};
    let statements = Parser::parse_sql(&dialect, sql).map_err(|e| {
        let msg = e.to_string();
        let cleaned = msg.trim_start_matches("sql parser error: ");
        anyhow!("{}", cleaned)
    })?;
    Ok(statements.len())
}

/// Whether a statement only reads, judged by its leading keyword
fn is_read_statement(sql: &str) -> bool {
    let first_word = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase();

    matches!(
        first_word.as_str(),
        "SELECT" | "WITH" | "DESCRIBE" | "SHOW" | "PRAGMA" | "SUMMARIZE" | "FROM"
    )
}

/// Reject anything that is not a plain SQL identifier.
///
/// Table and column names are interpolated into DDL, which cannot take bound
/// parameters.
pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(Error::validation(format!("Invalid SQL identifier: {:?}", name)).into())
    }
}

/// Split `schema.table` into its parts, defaulting the schema to `main`
fn split_table_name(table_name: &str) -> Result<(&str, &str)> {
    let (schema, table) = match table_name.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => (DEFAULT_SCHEMA, table_name),
    };
    validate_identifier(schema)?;
    validate_identifier(table)?;
    Ok((schema, table))
}

// ============================================================================
// Introspection
// ============================================================================

/// Check if a table exists
pub fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let (schema, table) = split_table_name(table_name)?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables
         WHERE table_schema = ? AND table_name = ?",
        [schema, table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Check if a column exists on a table
pub fn column_exists(conn: &Connection, table_name: &str, column: &str) -> Result<bool> {
    let (schema, table) = split_table_name(table_name)?;
    validate_identifier(column)?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.columns
         WHERE table_schema = ? AND table_name = ? AND column_name = ?",
        [schema, table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// List a table's columns in declaration order (empty if the table is missing)
pub fn list_columns(conn: &Connection, table_name: &str) -> Result<Vec<ColumnInfo>> {
    let (schema, table) = split_table_name(table_name)?;
    let mut stmt = conn.prepare(
        "SELECT column_name, data_type, is_nullable, column_default
         FROM information_schema.columns
         WHERE table_schema = ? AND table_name = ?
         ORDER BY ordinal_position",
    )?;

    let columns = stmt
        .query_map([schema, table], |row| {
            let nullable: String = row.get(2)?;
            Ok(ColumnInfo {
                name: row.get(0)?,
                data_type: row.get(1)?,
                nullable: nullable.eq_ignore_ascii_case("YES"),
                default: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(columns)
}

/// List base tables in the default schema, sorted by name
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT table_name FROM information_schema.tables
         WHERE table_schema = ? AND table_type = 'BASE TABLE'
         ORDER BY table_name",
    )?;
    let tables = stmt
        .query_map([DEFAULT_SCHEMA], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tables)
}

// ============================================================================
// Schema changes
// ============================================================================

/// Add a column (without default). Fails if the column already exists;
/// callers check with [`column_exists`] first.
pub fn add_column(conn: &Connection, spec: &ColumnSpec) -> Result<()> {
    validate_identifier(spec.table)?;
    validate_identifier(spec.name)?;
    if !SQL_TYPE.is_match(spec.sql_type) {
        return Err(Error::validation(format!("Invalid SQL type: {:?}", spec.sql_type)).into());
    }

    conn.execute_batch(&spec.add_column_sql())
        .with_context(|| format!("Failed to add column {}", spec))?;
    Ok(())
}

/// Set a column's default to its declared default, if it has one
pub fn set_column_default(conn: &Connection, spec: &ColumnSpec) -> Result<()> {
    validate_identifier(spec.table)?;
    validate_identifier(spec.name)?;
    if let Some(sql) = spec.set_default_sql() {
        conn.execute_batch(&sql)
            .with_context(|| format!("Failed to set default on {}", spec))?;
    }
    Ok(())
}

/// Fill NULLs in a column with its declared default. Returns rows updated.
pub fn backfill_column_default(conn: &Connection, spec: &ColumnSpec) -> Result<usize> {
    validate_identifier(spec.table)?;
    validate_identifier(spec.name)?;
    match spec.backfill_sql() {
        Some(sql) => Ok(conn
            .execute(&sql, [])
            .with_context(|| format!("Failed to backfill {}", spec))?),
        None => Ok(0),
    }
}

/// Count rows where a column is NULL
pub fn count_nulls(conn: &Connection, table_name: &str, column: &str) -> Result<i64> {
    let (schema, table) = split_table_name(table_name)?;
    validate_identifier(column)?;
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {}.{} WHERE {} IS NULL",
            schema, table, column
        ),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Count all rows in a table
pub fn count_rows(conn: &Connection, table_name: &str) -> Result<i64> {
    let (schema, table) = split_table_name(table_name)?;
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}.{}", schema, table),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// Game data
// ============================================================================

/// Check if a `game_data` row exists for a game type
pub fn game_type_exists(conn: &Connection, game_type: GameType) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM game_data WHERE game_type = ?",
        [game_type.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Insert a config row unless one already exists for the game type.
///
/// Guarded by `NOT EXISTS` rather than `INSERT OR IGNORE` so it also holds on
/// legacy tables created without a unique constraint on `game_type`.
/// Returns true if a row was inserted.
pub fn insert_game_config_if_absent(
    conn: &Connection,
    game_type: GameType,
    config: &str,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO game_data (game_type, game_config)
         SELECT CAST(? AS VARCHAR), CAST(? AS VARCHAR)
         WHERE NOT EXISTS (SELECT 1 FROM game_data WHERE game_type = ?)",
        params![game_type.as_str(), config, game_type.as_str()],
    )?;
    Ok(inserted > 0)
}

/// Set `game_config` on every row where it is NULL. Returns rows updated.
pub fn backfill_null_game_configs(conn: &Connection, config: &str) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE game_data SET game_config = ? WHERE game_config IS NULL",
        [config],
    )?;
    Ok(updated)
}

/// Read every `game_data` row's config, ordered by game type
pub fn get_game_configs(conn: &Connection) -> Result<Vec<GameConfigRow>> {
    let has_config = column_exists(conn, GAME_DATA_TABLE, "game_config")?;
    let sql = if has_config {
        "SELECT game_type, game_config, length(game_config) FROM game_data ORDER BY game_type"
    } else {
        "SELECT game_type, NULL, NULL FROM game_data ORDER BY game_type"
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(GameConfigRow {
                game_type: row.get(0)?,
                game_config: row.get(1)?,
                config_length: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// Schema version tracking
// ============================================================================

/// Create the `schema_version` table if it does not exist
pub fn ensure_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_VERSION_SQL)
        .context("Failed to create schema_version table")?;
    Ok(())
}

/// Check if a migration version has been recorded
pub fn schema_version_recorded(conn: &Connection, version: i64) -> Result<bool> {
    if !table_exists(conn, "schema_version")? {
        return Ok(false);
    }
    let found: Option<i64> = conn
        .query_row(
            "SELECT version FROM schema_version WHERE version = ?",
            [version],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Record a completed migration unless it is already recorded.
/// Returns true if a row was written.
pub fn record_schema_version(
    conn: &Connection,
    version: i64,
    name: &str,
    run_id: &str,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO schema_version (version, name, run_id)
         SELECT CAST(? AS INTEGER), CAST(? AS VARCHAR), CAST(? AS VARCHAR)
         WHERE NOT EXISTS (SELECT 1 FROM schema_version WHERE version = ?)",
        params![version, name, run_id, version],
    )?;
    Ok(inserted > 0)
}

/// Read recorded migrations, oldest version first
pub fn get_schema_versions(conn: &Connection) -> Result<Vec<SchemaVersionRow>> {
    if !table_exists(conn, "schema_version")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT version, name, run_id, CAST(applied_at AS VARCHAR)
         FROM schema_version ORDER BY version",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SchemaVersionRow {
                version: row.get(0)?,
                name: row.get(1)?,
                run_id: row.get(2)?,
                applied_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// Repository
// ============================================================================

/// DuckDB repository implementation
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbRepository {
    /// Open (or create) a database file
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which occur when another process holds the database open.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[gumshoe] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Disable extension autoloading; JSON is statically linked via the "json" feature
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        Ok(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)).into())
    }

    /// Path of the database file (None for in-memory databases)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `f` inside a single transaction.
    ///
    /// Commits when `f` returns `Ok`; any error rolls back every statement
    /// `f` executed.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }

    /// Run `f` against the connection without opening a transaction
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Flush the write-ahead log into the database file
    pub fn checkpoint(&self) -> Result<()> {
        self.lock()?.execute_batch("CHECKPOINT")?;
        Ok(())
    }

    pub fn get_db_size(&self) -> Result<u64> {
        match &self.db_path {
            Some(path) => Ok(std::fs::metadata(path)?.len()),
            None => Ok(0),
        }
    }

    // === Introspection ===

    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        table_exists(&*self.lock()?, table_name)
    }

    pub fn column_exists(&self, table_name: &str, column: &str) -> Result<bool> {
        column_exists(&*self.lock()?, table_name, column)
    }

    pub fn list_columns(&self, table_name: &str) -> Result<Vec<ColumnInfo>> {
        list_columns(&*self.lock()?, table_name)
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        list_tables(&*self.lock()?)
    }

    pub fn count_nulls(&self, table_name: &str, column: &str) -> Result<i64> {
        count_nulls(&*self.lock()?, table_name, column)
    }

    // === Game data ===

    pub fn get_game_configs(&self) -> Result<Vec<GameConfigRow>> {
        get_game_configs(&*self.lock()?)
    }

    pub fn get_schema_versions(&self) -> Result<Vec<SchemaVersionRow>> {
        get_schema_versions(&*self.lock()?)
    }

    pub fn schema_version_recorded(&self, version: i64) -> Result<bool> {
        schema_version_recorded(&*self.lock()?, version)
    }

    // === Operator SQL ===

    /// Execute a read-only query
    ///
    /// Only single SELECT-style statements are accepted; anything that could
    /// write is rejected before reaching the database.
    pub fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let statement_count = validate_sql_syntax(sql)?;
        if statement_count != 1 || !is_read_statement(sql) {
            anyhow::bail!("Only a single read-only query is allowed");
        }

        let conn = self.lock()?;
        read_rows(&conn, sql)
    }

    /// Execute an operator SQL script (read or write)
    ///
    /// A single read statement returns its rows. A single write statement
    /// returns `affected_rows`. A multi-statement script runs inside one
    /// transaction and returns `statements_executed`; any failing statement
    /// rolls back the whole script.
    pub fn execute_script(&self, sql: &str) -> Result<QueryResult> {
        let statement_count = validate_sql_syntax(sql)?;
        if statement_count == 0 {
            anyhow::bail!("No SQL statements to execute");
        }

        if statement_count == 1 {
            let conn = self.lock()?;
            if is_read_statement(sql) {
                return read_rows(&conn, sql);
            }
            let affected = conn.execute(sql, [])?;
            return Ok(QueryResult {
                columns: vec!["affected_rows".to_string()],
                rows: vec![vec![serde_json::json!(affected)]],
                row_count: 1,
            });
        }

        self.with_transaction(|tx| {
            tx.execute_batch(sql)?;
            Ok(())
        })?;

        Ok(QueryResult {
            columns: vec!["statements_executed".to_string()],
            rows: vec![vec![serde_json::json!(statement_count)]],
            row_count: 1,
        })
    }
}

fn read_rows(conn: &Connection, sql: &str) -> Result<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    let mut result_rows = stmt.query([])?;

    let mut rows: Vec<Vec<serde_json::Value>> = Vec::new();
    let mut column_count = 0;

    while let Some(row) = result_rows.next()? {
        if rows.is_empty() {
            column_count = row.as_ref().column_count();
        }

        let row_values: Vec<serde_json::Value> =
            (0..column_count).map(|i| get_column_value(row, i)).collect();
        rows.push(row_values);
    }

    // Release the borrow on stmt before reading column names
    drop(result_rows);

    let count = if column_count > 0 {
        column_count
    } else {
        stmt.column_count()
    };
    let columns: Vec<String> = (0..count)
        .map(|i| {
            stmt.column_name(i)
                .map(|s| s.to_string())
                .unwrap_or_else(|_| format!("col{}", i))
        })
        .collect();

    let row_count = rows.len();
    Ok(QueryResult {
        columns,
        rows,
        row_count,
    })
}

fn get_column_value(row: &duckdb::Row, idx: usize) -> serde_json::Value {
    use duckdb::types::ValueRef;

    match row.get_ref(idx) {
        Ok(ValueRef::Null) => serde_json::Value::Null,
        Ok(ValueRef::Boolean(b)) => serde_json::Value::Bool(b),
        Ok(ValueRef::TinyInt(i)) => serde_json::json!(i),
        Ok(ValueRef::SmallInt(i)) => serde_json::json!(i),
        Ok(ValueRef::Int(i)) => serde_json::json!(i),
        Ok(ValueRef::BigInt(i)) => serde_json::json!(i),
        Ok(ValueRef::HugeInt(i)) => serde_json::json!(i.to_string()),
        Ok(ValueRef::UTinyInt(i)) => serde_json::json!(i),
        Ok(ValueRef::USmallInt(i)) => serde_json::json!(i),
        Ok(ValueRef::UInt(i)) => serde_json::json!(i),
        Ok(ValueRef::UBigInt(i)) => serde_json::json!(i),
        Ok(ValueRef::Float(f)) => serde_json::json!(f),
        Ok(ValueRef::Double(f)) => serde_json::json!(f),
        Ok(ValueRef::Decimal(d)) => {
            let s = d.to_string();
            match s.parse::<f64>() {
                Ok(f) => serde_json::json!(f),
                Err(_) => serde_json::Value::String(s),
            }
        }
        Ok(ValueRef::Text(bytes)) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).to_string())
        }
        Ok(ValueRef::Blob(bytes)) => {
            serde_json::Value::String(format!("<blob {} bytes>", bytes.len()))
        }
        Ok(ValueRef::Date32(d)) => {
            // Days since epoch
            let date = chrono::DateTime::from_timestamp(d as i64 * 86_400, 0)
                .map(|dt| dt.date_naive().to_string())
                .unwrap_or_else(|| d.to_string());
            serde_json::Value::String(date)
        }
        Ok(ValueRef::Timestamp(_, ts)) => {
            // Microseconds since epoch
            let dt = chrono::DateTime::from_timestamp_micros(ts)
                .map(|dt| dt.naive_utc().to_string())
                .unwrap_or_else(|| ts.to_string());
            serde_json::Value::String(dt)
        }
        _ => serde_json::Value::Null,
    }
}

/// Query result structure
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

/// One `game_data` row as seen by status and verification
#[derive(Debug, Clone, Serialize)]
pub struct GameConfigRow {
    pub game_type: String,
    pub game_config: Option<String>,
    /// Length of the stored text; NULL when `game_config` is NULL
    pub config_length: Option<i64>,
}

/// One recorded migration
#[derive(Debug, Clone, Serialize)]
pub struct SchemaVersionRow {
    pub version: i64,
    pub name: String,
    pub run_id: String,
    pub applied_at: Option<String>,
}
