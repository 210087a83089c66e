use crate::models::error::Result;
use crate::repo::record::Record;

pub const DEFAULT_BACKUP_INTERVAL: i64 = 3600;
pub const DEFAULT_KEEP_HISTORY_DURATION: i64 = 3600 * 24 * 7;
pub const DEFAULT_EXCLUDE_FILTER: &str = "*.tmp\n*/.dropbox/*\n*/.git/*\n*~*";

/// A `backupDirectories` row: one source tree mirrored into one backup tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupDirectory {
    pub id: i64,
    pub source_dir: String,
    pub remote_dir: String,
    /// Epoch seconds of the last completed pass, `None` if it never ran.
    pub last_finished_backup: Option<i64>,
    pub backup_interval: i64,
    pub keep_history_duration: i64,
    /// Newline separated glob patterns.
    pub exclude_filter: String,
}

impl BackupDirectory {
    pub fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get_i64("id")?,
            source_dir: record.get_string("sourceDir")?,
            remote_dir: record.get_string("remoteDir")?,
            last_finished_backup: record.get_opt_i64("lastFinishedBackup")?,
            backup_interval: record.get_opt_i64("backupInterval")?.unwrap_or(0),
            keep_history_duration: record.get_opt_i64("keepHistoryDuration")?.unwrap_or(0),
            exclude_filter: record.get_string("excludeFilter")?,
        })
    }

    pub fn next_due(&self) -> i64 {
        self.last_finished_backup
            .unwrap_or(0)
            .saturating_add(self.backup_interval)
    }

    pub fn is_due(&self, now: i64) -> bool {
        now >= self.next_due()
    }

    pub fn settings(&self) -> BackupDirectorySettings {
        BackupDirectorySettings {
            source_dir: self.source_dir.clone(),
            remote_dir: self.remote_dir.clone(),
            backup_interval: self.backup_interval,
            keep_history_duration: self.keep_history_duration,
            exclude_filter: self.exclude_filter.clone(),
        }
    }
}

/// The user-editable part of a backup directory.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupDirectorySettings {
    pub source_dir: String,
    pub remote_dir: String,
    pub backup_interval: i64,
    pub keep_history_duration: i64,
    pub exclude_filter: String,
}

impl Default for BackupDirectorySettings {
    fn default() -> Self {
        Self {
            source_dir: String::new(),
            remote_dir: String::new(),
            backup_interval: DEFAULT_BACKUP_INTERVAL,
            keep_history_duration: DEFAULT_KEEP_HISTORY_DURATION,
            exclude_filter: DEFAULT_EXCLUDE_FILTER.to_string(),
        }
    }
}
