use crate::models::error::Result;
use crate::repo::record::Record;
use std::path::{Path, PathBuf};

/// A `history` row: one archived version of a superseded or deleted file.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub backup_directory: i64,
    pub remote_file_path: String,
    pub original_file_path: String,
    /// Archival time; doubles as the retention clock.
    pub version: i64,
}

impl HistoryEntry {
    pub fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get_i64("id")?,
            backup_directory: record.get_i64("backupDirectory")?,
            remote_file_path: record.get_string("remoteFilePath")?,
            original_file_path: record.get_string("originalFilePath")?,
            version: record.get_opt_i64("version")?.unwrap_or(0),
        })
    }

    /// Location of the archival file; older rows store absolute paths.
    pub fn archival_path(&self, remote_root: &Path) -> PathBuf {
        remote_root.join(&self.remote_file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(remote_file_path: &str) -> HistoryEntry {
        HistoryEntry {
            id: 1,
            backup_directory: 1,
            remote_file_path: remote_file_path.to_string(),
            original_file_path: "docs/a.txt".to_string(),
            version: 100,
        }
    }

    #[test]
    fn test_relative_archival_path_is_joined_to_root() {
        let path = entry("docs/a.bkp.20240101000000.txt").archival_path(Path::new("/backup"));
        assert_eq!(path, PathBuf::from("/backup/docs/a.bkp.20240101000000.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_archival_path_is_kept() {
        let path = entry("/old/place/a.bkp.1.txt").archival_path(Path::new("/backup"));
        assert_eq!(path, PathBuf::from("/old/place/a.bkp.1.txt"));
    }
}
