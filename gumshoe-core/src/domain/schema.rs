//! Column declarations for the target schema

use std::fmt;

use serde::Serialize;

/// Default value applied to a newly added column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    CurrentTimestamp,
}

impl ColumnDefault {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnDefault::CurrentTimestamp => "current_timestamp",
        }
    }
}

/// A column the migration guarantees to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub table: &'static str,
    pub name: &'static str,
    pub sql_type: &'static str,
    pub default: Option<ColumnDefault>,
}

impl ColumnSpec {
    pub const fn new(table: &'static str, name: &'static str, sql_type: &'static str) -> Self {
        Self {
            table,
            name,
            sql_type,
            default: None,
        }
    }

    pub const fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// `ALTER TABLE ... ADD COLUMN ...` without a default clause.
    ///
    /// The default is set by [`ColumnSpec::set_default_sql`]; existing rows
    /// are filled by [`ColumnSpec::backfill_sql`].
    pub fn add_column_sql(&self) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.table, self.name, self.sql_type
        )
    }

    /// `ALTER TABLE ... ALTER COLUMN ... SET DEFAULT ...`, if the column has a default
    pub fn set_default_sql(&self) -> Option<String> {
        self.default.map(|d| {
            format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                self.table,
                self.name,
                d.as_sql()
            )
        })
    }

    /// `UPDATE ... SET col = <default> WHERE col IS NULL`, if the column has a default
    pub fn backfill_sql(&self) -> Option<String> {
        self.default.map(|d| {
            format!(
                "UPDATE {} SET {} = {} WHERE {} IS NULL",
                self.table,
                self.name,
                d.as_sql(),
                self.name
            )
        })
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

/// Column metadata read back from `information_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}
