//! Backup service - safety snapshots of a game database
//!
//! Backups are ZIP archives in `<data_dir>/backups/<database>/` holding the
//! database file and `settings.json` when present. Each database only sees
//! its own directory, so retention and restore never cross databases.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::config::SETTINGS_FILE;
use crate::domain::result::Error;
use crate::domain::BackupMetadata;

const BACKUP_PREFIX: &str = "gumshoe-";
const PRE_RESTORE_PREFIX: &str = "gumshoe-pre-restore-";

/// Backup service for one database file
pub struct BackupService {
    data_dir: PathBuf,
    db_name: String,
    db_path: PathBuf,
}

impl BackupService {
    pub fn new(data_dir: PathBuf, db_name: &str, db_path: PathBuf) -> Self {
        Self {
            data_dir,
            db_name: scope_name(db_name),
            db_path,
        }
    }

    /// `<data_dir>/backups/<database>`
    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups").join(&self.db_name)
    }

    /// Name the database file is stored under inside the archive
    fn db_entry_name(&self) -> String {
        self.db_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("database.duckdb")
            .to_string()
    }

    /// Snapshot the database (and settings) into a new archive
    ///
    /// Callers holding an open connection should checkpoint first so the
    /// file on disk is complete.
    pub fn create(&self, max_backups: Option<usize>) -> Result<BackupMetadata> {
        if !self.db_path.exists() {
            return Err(Error::not_found(format!(
                "Database file {}",
                self.db_path.display()
            ))
            .into());
        }

        let backup_name = timestamped_name(BACKUP_PREFIX);
        let backup_path = self.write_archive(&backup_name, true)?;

        if let Some(max) = max_backups {
            self.apply_retention(max)?;
        }

        let size_bytes = fs::metadata(&backup_path)?.len();
        Ok(BackupMetadata::new(backup_name, Utc::now(), size_bytes))
    }

    fn write_archive(&self, backup_name: &str, include_settings: bool) -> Result<PathBuf> {
        let backups_dir = self.backups_dir();
        fs::create_dir_all(&backups_dir)?;
        let backup_path = backups_dir.join(backup_name);

        let file = File::create(&backup_path)
            .with_context(|| format!("Failed to create backup file {}", backup_path.display()))?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(self.db_entry_name(), options)?;
        zip.write_all(&fs::read(&self.db_path)?)?;

        let settings_path = self.data_dir.join(SETTINGS_FILE);
        if include_settings && settings_path.exists() {
            zip.start_file(SETTINGS_FILE, options)?;
            zip.write_all(&fs::read(&settings_path)?)?;
        }

        zip.finish()?;
        Ok(backup_path)
    }

    /// List backups, newest first
    pub fn list(&self) -> Result<Vec<BackupMetadata>> {
        let backups_dir = self.backups_dir();
        if !backups_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&backups_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("zip") {
                continue;
            }

            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) if n.starts_with(BACKUP_PREFIX) => n.to_string(),
                _ => continue,
            };

            let size_bytes = fs::metadata(&path)?.len();
            let created_at = parse_backup_time(&name);
            backups.push(BackupMetadata::new(name, created_at, size_bytes));
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Replace the database file with the copy stored in a backup
    ///
    /// Only archives holding this database's file are accepted. The current
    /// database is first saved as a `gumshoe-pre-restore-` archive.
    /// `settings.json` is never restored. The database must not be open while
    /// restoring.
    pub fn restore(&self, backup_name: &str) -> Result<()> {
        if backup_name.contains(['/', '\\']) || backup_name.contains("..") {
            return Err(Error::validation(format!("Invalid backup name: {}", backup_name)).into());
        }
        let backup_path = self.backups_dir().join(backup_name);
        if !backup_path.exists() {
            return Err(Error::not_found(format!(
                "Backup {} for database {}",
                backup_name, self.db_name
            ))
            .into());
        }

        let mut archive = ZipArchive::new(File::open(&backup_path)?)?;
        let entry_name = self.db_entry_name();
        if archive.index_for_name(&entry_name).is_none() {
            return Err(Error::validation(format!(
                "Backup {} does not contain {}",
                backup_name, entry_name
            ))
            .into());
        }

        if self.db_path.exists() {
            self.write_archive(&timestamped_name(PRE_RESTORE_PREFIX), false)?;
        }

        // A stale WAL would be replayed on top of the restored file
        remove_if_exists(&wal_path(&self.db_path))?;

        let mut entry = archive.by_name(&entry_name)?;
        let mut outfile = File::create(&self.db_path)
            .with_context(|| format!("Failed to write {}", self.db_path.display()))?;
        std::io::copy(&mut entry, &mut outfile)?;

        Ok(())
    }

    /// Delete every backup of this database
    pub fn clear(&self) -> Result<ClearResult> {
        let backups = self.list()?;
        for backup in &backups {
            fs::remove_file(self.backups_dir().join(&backup.name))?;
        }
        Ok(ClearResult {
            deleted: backups.len() as i64,
        })
    }

    fn apply_retention(&self, max_backups: usize) -> Result<()> {
        let mut backups = self.list()?;
        while backups.len() > max_backups {
            if let Some(oldest) = backups.pop() {
                fs::remove_file(self.backups_dir().join(&oldest.name))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct ClearResult {
    pub deleted: i64,
}

/// Directory name for a database: anything outside `[A-Za-z0-9_.-]` becomes `_`
fn scope_name(db_name: &str) -> String {
    let cleaned: String = db_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "database".to_string(),
        _ => cleaned,
    }
}

fn timestamped_name(prefix: &str) -> String {
    let now = Utc::now();
    format!(
        "{}{}-{:06}.zip",
        prefix,
        now.format("%Y-%m-%dT%H-%M-%S"),
        now.timestamp_subsec_micros()
    )
}

/// Parse creation time from `gumshoe-[pre-restore-]TIMESTAMP-MICROS.zip`
fn parse_backup_time(backup_name: &str) -> DateTime<Utc> {
    let ts = backup_name
        .strip_prefix(PRE_RESTORE_PREFIX)
        .or_else(|| backup_name.strip_prefix(BACKUP_PREFIX))
        .and_then(|s| s.strip_suffix(".zip"));

    ts.and_then(|ts| {
        NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H-%M-%S-%f")
            .or_else(|_| NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H-%M-%S"))
            .ok()
    })
    .map(|dt| dt.and_utc())
    .unwrap_or_else(Utc::now)
}

fn wal_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".wal");
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn service_with_db(dir: &Path) -> BackupService {
        named_service(dir, "game", b"original")
    }

    fn named_service(dir: &Path, name: &str, contents: &[u8]) -> BackupService {
        let db_path = dir.join(format!("{}.duckdb", name));
        fs::write(&db_path, contents).unwrap();
        BackupService::new(dir.to_path_buf(), name, db_path)
    }

    #[test]
    fn test_create_and_list() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path());
        fs::write(dir.path().join(SETTINGS_FILE), "{}").unwrap();

        let backup = service.create(None).unwrap();
        assert!(backup.name.starts_with("gumshoe-"));
        assert!(backup.name.ends_with(".zip"));

        let backup_path = dir.path().join("backups").join("game").join(&backup.name);
        let archive = ZipArchive::new(File::open(backup_path).unwrap()).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert!(names.contains(&"game.duckdb"));
        assert!(names.contains(&"settings.json"));

        assert_eq!(service.list().unwrap().len(), 1);
    }

    #[test]
    fn test_create_without_database_fails() {
        let dir = tempdir().unwrap();
        let service = BackupService::new(
            dir.path().to_path_buf(),
            "missing",
            dir.path().join("missing.duckdb"),
        );
        let err = service.create(None).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NotFound(_))));
    }

    #[test]
    fn test_retention_keeps_newest() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path());

        for _ in 0..4 {
            service.create(Some(2)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(service.list().unwrap().len(), 2);
    }

    #[test]
    fn test_restore_replaces_database() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path());
        let backup = service.create(None).unwrap();

        fs::write(dir.path().join("game.duckdb"), b"changed").unwrap();
        service.restore(&backup.name).unwrap();

        assert_eq!(fs::read(dir.path().join("game.duckdb")).unwrap(), b"original");
        let names: Vec<String> = service.list().unwrap().into_iter().map(|b| b.name).collect();
        assert!(names.iter().any(|n| n.starts_with("gumshoe-pre-restore-")));
    }

    #[test]
    fn test_restore_rejects_unknown_and_path_names() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path());

        assert!(service.restore("gumshoe-nope.zip").is_err());
        assert!(service.restore("../game.duckdb").is_err());
    }

    #[test]
    fn test_restore_leaves_settings_alone() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path());
        fs::write(dir.path().join(SETTINGS_FILE), r#"{"defaultDatabase":"game"}"#).unwrap();
        let backup = service.create(None).unwrap();

        fs::write(dir.path().join(SETTINGS_FILE), r#"{"defaultDatabase":"prod"}"#).unwrap();
        service.restore(&backup.name).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap(),
            r#"{"defaultDatabase":"prod"}"#
        );
    }

    #[test]
    fn test_retention_is_per_database() {
        let dir = tempdir().unwrap();
        let prod = named_service(dir.path(), "prod", b"PROD");
        let staging = named_service(dir.path(), "staging", b"STAGING");

        let prod_backup = prod.create(Some(2)).unwrap();
        for _ in 0..3 {
            staging.create(Some(2)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let prod_names: Vec<String> = prod.list().unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(prod_names, vec![prod_backup.name]);
        assert_eq!(staging.list().unwrap().len(), 2);
        assert_ne!(prod.backups_dir(), staging.backups_dir());
    }

    #[test]
    fn test_restore_rejects_other_database_backup() {
        let dir = tempdir().unwrap();
        let prod = named_service(dir.path(), "prod", b"PROD");
        let staging = named_service(dir.path(), "staging", b"STAGING");
        let staging_backup = staging.create(None).unwrap();

        // Not visible from prod's scope
        let err = prod.restore(&staging_backup.name).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NotFound(_))));

        // Even when copied into prod's directory, the entry name does not match
        fs::create_dir_all(prod.backups_dir()).unwrap();
        fs::copy(
            staging.backups_dir().join(&staging_backup.name),
            prod.backups_dir().join(&staging_backup.name),
        )
        .unwrap();
        let err = prod.restore(&staging_backup.name).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Validation(_))));

        assert_eq!(fs::read(dir.path().join("prod.duckdb")).unwrap(), b"PROD");
        assert!(prod
            .list()
            .unwrap()
            .iter()
            .all(|b| !b.name.starts_with(PRE_RESTORE_PREFIX)));
    }

    #[test]
    fn test_clear_only_touches_own_database() {
        let dir = tempdir().unwrap();
        let prod = named_service(dir.path(), "prod", b"PROD");
        let staging = named_service(dir.path(), "staging", b"STAGING");
        prod.create(None).unwrap();
        staging.create(None).unwrap();

        assert_eq!(staging.clear().unwrap().deleted, 1);
        assert_eq!(prod.list().unwrap().len(), 1);
    }

    #[test]
    fn test_scope_name() {
        assert_eq!(scope_name("prod"), "prod");
        assert_eq!(scope_name("../etc"), ".._etc");
        assert_eq!(scope_name("my db"), "my_db");
        assert_eq!(scope_name(".."), "database");
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let service = service_with_db(dir.path());
        service.create(None).unwrap();

        assert_eq!(service.clear().unwrap().deleted, 1);
        assert!(service.list().unwrap().is_empty());
    }

    #[test]
    fn test_parse_backup_time() {
        let t = parse_backup_time("gumshoe-2024-03-01T10-20-30-000123.zip");
        assert_eq!(t.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-01 10:20:30");

        let t = parse_backup_time("gumshoe-pre-restore-2024-03-01T10-20-30-000123.zip");
        assert_eq!(t.format("%Y-%m-%d").to_string(), "2024-03-01");
    }
}
