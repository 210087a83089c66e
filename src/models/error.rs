use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A statement that failed on the storage worker, with everything needed to reproduce it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Database error '{message}' for query '{query}' [{}]", .params.join(", "))]
pub struct StorageError {
    pub query: String,
    pub params: Vec<String>,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Failed to read config file '{path}': {cause}")]
    ConfigRead { path: PathBuf, cause: io::Error },

    #[error("Failed to parse config file '{path}': {cause}")]
    ConfigParse {
        path: PathBuf,
        cause: serde_json::Error,
    },

    #[error("{0}")]
    Validation(String),

    #[error("Failed to open or create database file '{path}': {cause}")]
    DatabaseOpen {
        path: String,
        cause: rusqlite::Error,
    },

    #[error("Unsupported database version ({found}), expected {expected}")]
    UnsupportedSchemaVersion { found: String, expected: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Storage worker is no longer running")]
    StorageClosed,

    #[error("Backup scheduler is no longer running")]
    SchedulerStopped,

    #[error("Another backup engine is running on this database (lock file '{path}')")]
    EngineLocked { path: PathBuf },

    #[error("Column '{column}' {problem}")]
    Column { column: String, problem: String },

    #[error("Failed to get metadata for '{path}': {cause}")]
    MetadataError { path: PathBuf, cause: io::Error },

    #[error("Failed to open '{path}' for reading: {cause}")]
    OpenSource { path: PathBuf, cause: io::Error },

    #[error("Failed to open '{path}' for writing: {cause}")]
    OpenTarget { path: PathBuf, cause: io::Error },

    #[error("Failed to copy file from '{from}' to '{to}': {cause}")]
    FileCopy {
        from: PathBuf,
        to: PathBuf,
        cause: io::Error,
    },

    #[error("Failed to rename '{from}' to '{to}': {cause}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        cause: io::Error,
    },

    #[error("Failed to create path '{path}': {cause}")]
    CreateDir { path: PathBuf, cause: io::Error },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse failure classes; each one decides how much work is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or unusable directory: the backup directory is skipped.
    Validation,
    /// Copy, rename or remove failure: only the single file is affected.
    Io,
    /// Statement failure: the operation is abandoned, the pass continues.
    Storage,
    /// The store cannot be opened or understood: the process stops.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Io => write!(f, "io"),
            ErrorKind::Storage => write!(f, "storage"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::ConfigRead { .. }
            | BackupError::ConfigParse { .. }
            | BackupError::Validation(_) => ErrorKind::Validation,
            BackupError::DatabaseOpen { .. }
            | BackupError::UnsupportedSchemaVersion { .. }
            | BackupError::StorageClosed
            | BackupError::SchedulerStopped
            | BackupError::EngineLocked { .. } => ErrorKind::Fatal,
            BackupError::Storage(_) | BackupError::Column { .. } => ErrorKind::Storage,
            BackupError::MetadataError { .. }
            | BackupError::OpenSource { .. }
            | BackupError::OpenTarget { .. }
            | BackupError::FileCopy { .. }
            | BackupError::Rename { .. }
            | BackupError::CreateDir { .. }
            | BackupError::Io(_) => ErrorKind::Io,
        }
    }

    /// True when the failure means the path simply is not there.
    pub fn is_not_found(&self) -> bool {
        match self {
            BackupError::MetadataError { cause, .. }
            | BackupError::OpenSource { cause, .. }
            | BackupError::Rename { cause, .. }
            | BackupError::Io(cause) => cause.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_message_contains_query_and_params() {
        let err = StorageError {
            query: "UPDATE files SET lastChecked = ?1 WHERE id = ?2".to_string(),
            params: vec!["100".to_string(), "7".to_string()],
            message: "no such table: files".to_string(),
        };

        let text = err.to_string();
        assert!(text.contains("no such table: files"));
        assert!(text.contains("UPDATE files SET lastChecked"));
        assert!(text.contains("[100, 7]"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BackupError::Validation("missing".to_string()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(BackupError::StorageClosed.kind(), ErrorKind::Fatal);
        assert_eq!(
            BackupError::Io(io::Error::other("boom")).kind(),
            ErrorKind::Io
        );
        let storage = BackupError::from(StorageError {
            query: "SELECT 1".to_string(),
            params: vec![],
            message: "busy".to_string(),
        });
        assert_eq!(storage.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_is_not_found() {
        let err = BackupError::Rename {
            from: PathBuf::from("a"),
            to: PathBuf::from("b"),
            cause: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.is_not_found());

        let err = BackupError::Rename {
            from: PathBuf::from("a"),
            to: PathBuf::from("b"),
            cause: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(!err.is_not_found());
    }
}
