use crate::models::backup_directory::{BackupDirectory, BackupDirectorySettings};
use crate::models::config_validator::{validate_new_backup_directory, validate_schedule};
use crate::models::error::{BackupError, Result};
use crate::models::history_entry::HistoryEntry;
use crate::repo::queries;
use crate::repo::sqlite::Database;
use crate::utils::duration::format_duration;
use chrono::{Local, TimeZone, Utc};
use log::info;
use std::fs;
use std::path::Path;

/// What may change on an existing directory. Source and backup folders stay fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryChanges {
    pub backup_interval: Option<i64>,
    pub keep_history_duration: Option<i64>,
    pub exclude_filter: Option<String>,
}

/// Validates and stores a new backup directory; folders are stored as absolute paths.
pub fn add_directory(db: &Database, settings: BackupDirectorySettings) -> Result<i64> {
    validate_new_backup_directory(&settings)?;

    let settings = BackupDirectorySettings {
        source_dir: absolute(&settings.source_dir)?,
        remote_dir: absolute(&settings.remote_dir)?,
        ..settings
    };
    let id = queries::create_backup_directory(db, &settings)?;
    info!(
        "Added backup directory {}: '{}' -> '{}'",
        id, settings.source_dir, settings.remote_dir
    );
    Ok(id)
}

pub fn edit_directory(
    db: &Database,
    directory_id: i64,
    changes: DirectoryChanges,
) -> Result<BackupDirectory> {
    let mut directory = existing(db, directory_id)?;
    if let Some(interval) = changes.backup_interval {
        directory.backup_interval = interval;
    }
    if let Some(keep) = changes.keep_history_duration {
        directory.keep_history_duration = keep;
    }
    if let Some(filter) = changes.exclude_filter {
        directory.exclude_filter = filter;
    }

    let settings = directory.settings();
    validate_schedule(&settings)?;
    queries::update_backup_directory(db, directory_id, &settings)?;
    info!("Updated backup directory {}", directory_id);
    Ok(directory)
}

/// Forgets the directory, its file records and its history. Files on disk stay.
pub fn remove_directory(db: &Database, directory_id: i64) -> Result<()> {
    if !queries::delete_backup_directory(db, directory_id)? {
        return Err(not_found(directory_id));
    }
    info!("Removed backup directory {}", directory_id);
    Ok(())
}

pub fn list_directories(db: &Database) -> Result<Vec<BackupDirectory>> {
    queries::list_backup_directories(db)
}

pub fn directory_history(db: &Database, directory_id: i64) -> Result<Vec<HistoryEntry>> {
    existing(db, directory_id)?;
    queries::history_for_directory(db, directory_id)
}

/// One line per directory for listings.
pub fn describe_directory(directory: &BackupDirectory) -> String {
    let last = match directory.last_finished_backup {
        Some(time) => format_time(time),
        None => "never".to_string(),
    };
    let next = if directory.is_due(Utc::now().timestamp()) {
        "due now".to_string()
    } else {
        format_time(directory.next_due())
    };
    format!(
        "[{}] {} -> {} | every {} | keep {} | last backup: {} | next: {}",
        directory.id,
        directory.source_dir,
        directory.remote_dir,
        format_duration(directory.backup_interval),
        format_duration(directory.keep_history_duration),
        last,
        next
    )
}

pub fn describe_history(entry: &HistoryEntry) -> String {
    format!(
        "{} | {} -> {}",
        format_time(entry.version),
        entry.original_file_path,
        entry.remote_file_path
    )
}

/// Local time as `YYYY-MM-DD hh:mm:ss`.
pub fn format_time(epoch_secs: i64) -> String {
    match Local.timestamp_opt(epoch_secs, 0).earliest() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => epoch_secs.to_string(),
    }
}

fn existing(db: &Database, directory_id: i64) -> Result<BackupDirectory> {
    queries::backup_directory(db, directory_id)?.ok_or_else(|| not_found(directory_id))
}

fn not_found(directory_id: i64) -> BackupError {
    BackupError::Validation(format!("Backup directory {} does not exist", directory_id))
}

fn absolute(dir: &str) -> Result<String> {
    let path = fs::canonicalize(Path::new(dir)).map_err(|cause| BackupError::MetadataError {
        path: dir.into(),
        cause,
    })?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn folders() -> (TempDir, String, String) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let remote = temp_dir.path().join("remote");
        fs::create_dir(&source).unwrap();
        fs::create_dir(&remote).unwrap();
        (
            temp_dir,
            source.to_str().unwrap().to_string(),
            remote.to_str().unwrap().to_string(),
        )
    }

    #[test]
    fn test_add_directory_with_defaults() {
        let (_temp_dir, source, remote) = folders();
        let db = Database::open(":memory:").unwrap();

        let id = add_directory(
            &db,
            BackupDirectorySettings {
                source_dir: source.clone(),
                remote_dir: remote,
                ..BackupDirectorySettings::default()
            },
        )
        .unwrap();

        let listed = list_directories(&db).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(
            Path::new(&listed[0].source_dir),
            fs::canonicalize(&source).unwrap()
        );
        assert_eq!(listed[0].backup_interval, 3600);
        let line = describe_directory(&listed[0]);
        assert!(line.contains("last backup: never"));
        assert!(line.contains("next: due now"));
    }

    #[test]
    fn test_add_rejects_non_empty_backup_folder() {
        let (_temp_dir, source, remote) = folders();
        fs::write(Path::new(&remote).join("x.txt"), "x").unwrap();
        let db = Database::open(":memory:").unwrap();

        let result = add_directory(
            &db,
            BackupDirectorySettings {
                source_dir: source,
                remote_dir: remote,
                ..BackupDirectorySettings::default()
            },
        );

        assert!(matches!(result, Err(BackupError::Validation(_))));
        assert!(list_directories(&db).unwrap().is_empty());
    }

    #[test]
    fn test_edit_changes_only_given_fields() {
        let (_temp_dir, source, remote) = folders();
        let db = Database::open(":memory:").unwrap();
        let id = add_directory(
            &db,
            BackupDirectorySettings {
                source_dir: source,
                remote_dir: remote,
                ..BackupDirectorySettings::default()
            },
        )
        .unwrap();

        let edited = edit_directory(
            &db,
            id,
            DirectoryChanges {
                backup_interval: Some(900),
                ..DirectoryChanges::default()
            },
        )
        .unwrap();

        assert_eq!(edited.backup_interval, 900);
        assert_eq!(edited.keep_history_duration, 3600 * 24 * 7);
        let stored = queries::backup_directory(&db, id).unwrap().unwrap();
        assert_eq!(stored, edited);

        let invalid = edit_directory(
            &db,
            id,
            DirectoryChanges {
                backup_interval: Some(0),
                ..DirectoryChanges::default()
            },
        );
        assert!(invalid.is_err());
    }

    #[test]
    fn test_edit_works_while_folders_are_offline() {
        let (temp_dir, source, remote) = folders();
        let db = Database::open(":memory:").unwrap();
        let id = add_directory(
            &db,
            BackupDirectorySettings {
                source_dir: source,
                remote_dir: remote,
                ..BackupDirectorySettings::default()
            },
        )
        .unwrap();
        drop(temp_dir);

        let edited = edit_directory(
            &db,
            id,
            DirectoryChanges {
                exclude_filter: Some("*.iso".to_string()),
                ..DirectoryChanges::default()
            },
        )
        .unwrap();
        assert_eq!(edited.exclude_filter, "*.iso");

        let too_long = edit_directory(
            &db,
            id,
            DirectoryChanges {
                backup_interval: Some(i64::MAX),
                ..DirectoryChanges::default()
            },
        );
        assert!(too_long.is_err());
        queries::set_last_finished_backup(&db, id, 1_700_000_000).unwrap();
        let stored = queries::backup_directory(&db, id).unwrap().unwrap();
        assert_eq!(stored.backup_interval, 3600);
        assert!(describe_directory(&stored).contains("every 1h"));
    }

    #[test]
    fn test_unknown_directory_errors() {
        let db = Database::open(":memory:").unwrap();

        assert!(remove_directory(&db, 42).is_err());
        assert!(directory_history(&db, 42).is_err());
        assert!(edit_directory(&db, 42, DirectoryChanges::default()).is_err());
    }

    #[test]
    fn test_describe_history() {
        let entry = HistoryEntry {
            id: 1,
            backup_directory: 1,
            remote_file_path: "a.bkp.20240101000000.txt".to_string(),
            original_file_path: "a.txt".to_string(),
            version: 1_700_000_000,
        };

        let line = describe_history(&entry);
        assert!(line.contains("a.txt -> a.bkp.20240101000000.txt"));
        assert!(line.starts_with("2023-11-1"));
    }
}
