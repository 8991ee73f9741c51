//! Core domain entities
//!
//! Pure data structures with validation logic - no I/O or external dependencies.

mod backup;
mod game;
pub mod result;
mod schema;

pub use backup::BackupMetadata;
pub use game::{GameConfig, GameType, DEFAULT_GAME_CONFIG, GAME_CONFIG_KEYS};
pub use schema::{ColumnDefault, ColumnInfo, ColumnSpec};
