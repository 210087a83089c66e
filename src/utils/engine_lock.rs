use crate::models::error::{BackupError, Result};
use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

/// Exclusive claim on a database for running backup passes.
///
/// Held by the daemon and by one-shot passes so two engines never write the
/// same backup tree. Released when dropped.
#[derive(Debug)]
pub struct EngineLock {
    path: Option<PathBuf>,
    _file: Option<File>,
}

impl EngineLock {
    /// Locks `<database_file>.lock`. An in-memory database needs no lock.
    pub fn acquire(database_file: &str) -> Result<Self> {
        if database_file == ":memory:" {
            return Ok(Self {
                path: None,
                _file: None,
            });
        }

        let path = PathBuf::from(format!("{}.lock", database_file));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(BackupError::EngineLocked { path });
        }

        debug!("Acquired engine lock {}", path.display());
        Ok(Self {
            path: Some(path),
            _file: Some(file),
        })
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}
