//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "databases": { "prod": "/srv/gumshoe/prod.duckdb", "staging": "staging.duckdb" },
//!   "defaultDatabase": "prod",
//!   "backup": { "enabled": true, "maxBackups": 10 }
//! }
//! ```
//! Every field is optional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::result::Error;

pub const SETTINGS_FILE: &str = "settings.json";

/// Database name used when neither the CLI nor settings pick one
pub const DEFAULT_DATABASE_NAME: &str = "gumshoe";

const DEFAULT_MAX_BACKUPS: usize = 10;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    databases: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_database: Option<String>,
    #[serde(default)]
    backup: BackupSettings,
}

/// Pre-migration backup settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_backups() -> usize {
    DEFAULT_MAX_BACKUPS
}

/// Gumshoe configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Named database instances (name -> path)
    pub databases: BTreeMap<String, String>,
    pub default_database: Option<String>,
    pub backup: BackupSettings,
}

impl Config {
    /// Load config from the data directory
    ///
    /// `GUMSHOE_SKIP_BACKUP` (true/1/yes) disables pre-migration backups
    /// regardless of the settings file.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            serde_json::from_str(&content).map_err(|e| {
                Error::config(format!("Invalid {}: {}", settings_path.display(), e))
            })?
        } else {
            SettingsFile::default()
        };

        let mut backup = raw.backup;
        if env_flag("GUMSHOE_SKIP_BACKUP") == Some(true) {
            backup.enabled = false;
        }

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            databases: raw.databases,
            default_database: raw.default_database,
            backup,
        })
    }

    /// Resolve a database selector to a file path
    ///
    /// Resolution order:
    /// 1. a configured name maps to its path (relative paths resolve against the data dir)
    /// 2. a value containing a path separator or ending in `.duckdb` is a path,
    ///    relative to the current working directory
    /// 3. anything else is `<data_dir>/<name>.duckdb`
    ///
    /// With no selector, `defaultDatabase` or `gumshoe` is used.
    pub fn resolve_database(&self, selector: Option<&str>) -> Result<ResolvedDatabase> {
        let name = selector
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(self.default_database.as_deref())
            .unwrap_or(DEFAULT_DATABASE_NAME);

        if let Some(path) = self.databases.get(name) {
            return Ok(ResolvedDatabase {
                name: name.to_string(),
                path: self.relative_to_data_dir(Path::new(path)),
            });
        }

        if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') || name.ends_with(".duckdb") {
            let path = PathBuf::from(name);
            let display_name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::config(format!("Invalid database path: {}", name)))?
                .to_string();
            let path = if path.is_absolute() {
                path
            } else {
                std::env::current_dir()
                    .context("Failed to read the current directory")?
                    .join(path)
            };
            return Ok(ResolvedDatabase {
                name: display_name,
                path,
            });
        }

        if name.contains(char::is_whitespace) {
            return Err(Error::config(format!("Invalid database name: {:?}", name)).into());
        }

        Ok(ResolvedDatabase {
            name: name.to_string(),
            path: self.data_dir.join(format!("{}.duckdb", name)),
        })
    }

    fn relative_to_data_dir(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}

/// A database selected by name or path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDatabase {
    pub name: String,
    pub path: PathBuf,
}

fn env_flag(key: &str) -> Option<bool> {
    match std::env::var(key).ok().as_deref() {
        Some("true" | "1" | "yes" | "TRUE" | "YES") => Some(true),
        Some("false" | "0" | "no" | "FALSE" | "NO") => Some(false),
        _ => None,
    }
}
