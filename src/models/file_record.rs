use crate::models::error::Result;
use crate::repo::record::Record;

/// A `files` row: the backed-up state of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: i64,
    pub backup_directory: i64,
    /// Path relative to the source root, `/` separated.
    pub file_path: String,
    pub last_checked: i64,
    /// Source modification time the backup copy was made from.
    pub remote_version: i64,
}

impl FileRecord {
    pub fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get_i64("id")?,
            backup_directory: record.get_i64("backupDirectory")?,
            file_path: record.get_string("filePath")?,
            last_checked: record.get_opt_i64("lastChecked")?.unwrap_or(0),
            remote_version: record.get_opt_i64("remoteVersion")?.unwrap_or(0),
        })
    }
}
