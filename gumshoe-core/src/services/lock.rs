//! Exclusive migration lock
//!
//! An advisory lock on `<database>.migrate.lock` held for the duration of a
//! migration run. Acquisition never blocks: a second holder fails with
//! [`Error::Locked`].

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use crate::domain::result::Error;

pub struct MigrationLock {
    file: File,
    path: PathBuf,
}

impl MigrationLock {
    /// Lock the migration slot for a database file
    pub fn acquire(db_path: &Path) -> Result<Self> {
        let path = lock_path(db_path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(Error::locked(format!(
                "another migration is running against {}",
                db_path.display()
            ))
            .into());
        }

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".migrate.lock");
    PathBuf::from(name)
}
