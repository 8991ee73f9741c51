//! Adapter implementations
//!
//! - DuckDB for schema introspection, migration primitives and operator SQL

pub mod duckdb;
