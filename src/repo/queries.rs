use crate::models::backup_directory::{BackupDirectory, BackupDirectorySettings};
use crate::models::error::Result;
use crate::models::file_record::FileRecord;
use crate::models::history_entry::HistoryEntry;
use crate::repo::cursor::QueryCursor;
use crate::repo::record::Record;
use crate::repo::sqlite::Database;
use log::debug;
use rusqlite::types::Value;

const SELECT_DIRECTORY: &str = "SELECT id, sourceDir, remoteDir, lastFinishedBackup,
        backupInterval, keepHistoryDuration, excludeFilter
    FROM backupDirectories";

const SELECT_FILE: &str = "SELECT id, backupDirectory, filePath, lastChecked, remoteVersion
    FROM files";

const SELECT_HISTORY: &str = "SELECT id, backupDirectory, remoteFilePath, originalFilePath, version
    FROM history";

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn collect<T>(mut cursor: QueryCursor, map: fn(&Record) -> Result<T>) -> Result<Vec<T>> {
    let mut items = Vec::with_capacity(cursor.row_count());
    while let Some(record) = cursor.next()? {
        items.push(map(&record)?);
    }
    Ok(items)
}

/// Directories whose next backup time has arrived, oldest id first.
pub fn due_directories(db: &Database, now: i64) -> Result<QueryCursor> {
    db.select_query(
        &format!(
            "{} WHERE IFNULL(lastFinishedBackup, 0) + backupInterval <= ?1 ORDER BY id",
            SELECT_DIRECTORY
        ),
        vec![Value::Integer(now)],
    )
}

pub fn find_file(db: &Database, directory_id: i64, file_path: &str) -> Result<Option<FileRecord>> {
    db.select_row_opt(
        &format!("{} WHERE backupDirectory = ?1 AND filePath = ?2", SELECT_FILE),
        vec![Value::Integer(directory_id), text(file_path)],
    )?
    .map(|record| FileRecord::from_record(&record))
    .transpose()
}

pub fn insert_file(
    db: &Database,
    directory_id: i64,
    file_path: &str,
    last_checked: i64,
    remote_version: i64,
) -> Result<()> {
    db.exec(
        "INSERT INTO files (backupDirectory, filePath, lastChecked, remoteVersion)
            VALUES (?1, ?2, ?3, ?4)",
        vec![
            Value::Integer(directory_id),
            text(file_path),
            Value::Integer(last_checked),
            Value::Integer(remote_version),
        ],
    )
}

pub fn update_file_version(
    db: &Database,
    file_id: i64,
    last_checked: i64,
    remote_version: i64,
) -> Result<()> {
    db.exec(
        "UPDATE files SET lastChecked = ?1, remoteVersion = ?2 WHERE id = ?3",
        vec![
            Value::Integer(last_checked),
            Value::Integer(remote_version),
            Value::Integer(file_id),
        ],
    )
}

/// Marks a batch of files as seen in one transaction.
pub fn touch_files(db: &Database, file_ids: Vec<i64>, last_checked: i64) -> Result<usize> {
    if file_ids.is_empty() {
        return Ok(0);
    }

    debug!("Marking {} unchanged files as checked", file_ids.len());
    db.transaction("UPDATE files SET lastChecked = ?1 WHERE id = ?2 (batch)", move |tx| {
        let mut statement = tx.prepare_cached("UPDATE files SET lastChecked = ?1 WHERE id = ?2")?;
        let mut changed = 0;
        for id in &file_ids {
            changed += statement.execute((last_checked, id))?;
        }
        Ok(changed)
    })
}

/// Files of a directory that the pass at `pass_time` did not see.
pub fn removed_files(db: &Database, directory_id: i64, pass_time: i64) -> Result<QueryCursor> {
    db.select_query(
        &format!(
            "{} WHERE backupDirectory = ?1 AND IFNULL(lastChecked, 0) <> ?2 ORDER BY id",
            SELECT_FILE
        ),
        vec![Value::Integer(directory_id), Value::Integer(pass_time)],
    )
}

pub fn delete_file(db: &Database, file_id: i64) -> Result<()> {
    db.exec("DELETE FROM files WHERE id = ?1", vec![Value::Integer(file_id)])
}

pub fn insert_history(
    db: &Database,
    directory_id: i64,
    remote_file_path: &str,
    original_file_path: &str,
    version: i64,
) -> Result<()> {
    db.exec(
        "INSERT INTO history (backupDirectory, remoteFilePath, originalFilePath, version)
            VALUES (?1, ?2, ?3, ?4)",
        vec![
            Value::Integer(directory_id),
            text(remote_file_path),
            text(original_file_path),
            Value::Integer(version),
        ],
    )
}

/// History of a directory archived before `cutoff`.
pub fn expired_history(db: &Database, directory_id: i64, cutoff: i64) -> Result<QueryCursor> {
    db.select_query(
        &format!(
            "{} WHERE backupDirectory = ?1 AND version < ?2 ORDER BY version, id",
            SELECT_HISTORY
        ),
        vec![Value::Integer(directory_id), Value::Integer(cutoff)],
    )
}

pub fn delete_history(db: &Database, history_id: i64) -> Result<()> {
    db.exec(
        "DELETE FROM history WHERE id = ?1",
        vec![Value::Integer(history_id)],
    )
}

pub fn set_last_finished_backup(db: &Database, directory_id: i64, finished: i64) -> Result<()> {
    db.blocking_exec(
        "UPDATE backupDirectories SET lastFinishedBackup = ?1 WHERE id = ?2",
        vec![Value::Integer(finished), Value::Integer(directory_id)],
    )?;
    Ok(())
}

/// Makes one directory, or every directory, due on the next pass.
pub fn clear_last_finished_backup(db: &Database, directory_id: Option<i64>) -> Result<usize> {
    match directory_id {
        Some(id) => db.blocking_exec(
            "UPDATE backupDirectories SET lastFinishedBackup = NULL WHERE id = ?1",
            vec![Value::Integer(id)],
        ),
        None => db.blocking_exec(
            "UPDATE backupDirectories SET lastFinishedBackup = NULL",
            vec![],
        ),
    }
}

/// Earliest time any directory becomes due, `None` without directories.
pub fn next_due_time(db: &Database) -> Result<Option<i64>> {
    let value = db.select_value(
        "SELECT MIN(IFNULL(lastFinishedBackup, 0) + backupInterval) FROM backupDirectories",
        vec![],
    )?;
    Ok(match value {
        Value::Integer(due) => Some(due),
        Value::Real(due) => Some(due as i64),
        _ => None,
    })
}

/// Inserts an empty row, then fills it in. Returns the new id.
pub fn create_backup_directory(db: &Database, settings: &BackupDirectorySettings) -> Result<i64> {
    let id = db.insert("INSERT INTO backupDirectories DEFAULT VALUES", vec![])?;
    update_backup_directory(db, id, settings)?;
    Ok(id)
}

pub fn update_backup_directory(
    db: &Database,
    directory_id: i64,
    settings: &BackupDirectorySettings,
) -> Result<usize> {
    db.blocking_exec(
        "UPDATE backupDirectories
            SET sourceDir = ?1, remoteDir = ?2, backupInterval = ?3,
                keepHistoryDuration = ?4, excludeFilter = ?5
            WHERE id = ?6",
        vec![
            text(&settings.source_dir),
            text(&settings.remote_dir),
            Value::Integer(settings.backup_interval),
            Value::Integer(settings.keep_history_duration),
            text(&settings.exclude_filter),
            Value::Integer(directory_id),
        ],
    )
}

pub fn list_backup_directories(db: &Database) -> Result<Vec<BackupDirectory>> {
    let cursor = db.select_query(&format!("{} ORDER BY id", SELECT_DIRECTORY), vec![])?;
    collect(cursor, BackupDirectory::from_record)
}

pub fn backup_directory(db: &Database, directory_id: i64) -> Result<Option<BackupDirectory>> {
    db.select_row_opt(
        &format!("{} WHERE id = ?1", SELECT_DIRECTORY),
        vec![Value::Integer(directory_id)],
    )?
    .map(|record| BackupDirectory::from_record(&record))
    .transpose()
}

/// Removes the directory together with its files and history rows.
/// Returns false when no such directory exists.
pub fn delete_backup_directory(db: &Database, directory_id: i64) -> Result<bool> {
    db.transaction("DELETE backup directory with files and history", move |tx| {
        tx.execute(
            "DELETE FROM files WHERE backupDirectory = ?1",
            [directory_id],
        )?;
        tx.execute(
            "DELETE FROM history WHERE backupDirectory = ?1",
            [directory_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM backupDirectories WHERE id = ?1",
            [directory_id],
        )?;
        Ok(removed > 0)
    })
}

/// Newest versions first.
pub fn history_for_directory(db: &Database, directory_id: i64) -> Result<Vec<HistoryEntry>> {
    let cursor = db.select_query(
        &format!(
            "{} WHERE backupDirectory = ?1 ORDER BY version DESC, id DESC",
            SELECT_HISTORY
        ),
        vec![Value::Integer(directory_id)],
    )?;
    collect(cursor, HistoryEntry::from_record)
}

pub fn files_for_directory(db: &Database, directory_id: i64) -> Result<Vec<FileRecord>> {
    let cursor = db.select_query(
        &format!("{} WHERE backupDirectory = ?1 ORDER BY filePath", SELECT_FILE),
        vec![Value::Integer(directory_id)],
    )?;
    collect(cursor, FileRecord::from_record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(source: &str, remote: &str) -> BackupDirectorySettings {
        BackupDirectorySettings {
            source_dir: source.to_string(),
            remote_dir: remote.to_string(),
            ..BackupDirectorySettings::default()
        }
    }

    #[test]
    fn test_create_and_read_directory() {
        let db = Database::open(":memory:").unwrap();

        let id = create_backup_directory(&db, &settings("/src", "/dst")).unwrap();
        let dir = backup_directory(&db, id).unwrap().unwrap();

        assert_eq!(dir.source_dir, "/src");
        assert_eq!(dir.remote_dir, "/dst");
        assert_eq!(dir.last_finished_backup, None);
        assert_eq!(dir.backup_interval, 3600);
        assert_eq!(dir.keep_history_duration, 3600 * 24 * 7);
        assert!(dir.exclude_filter.contains("*.tmp"));
        assert!(backup_directory(&db, id + 1).unwrap().is_none());
    }

    #[test]
    fn test_due_directories_and_next_due_time() {
        let db = Database::open(":memory:").unwrap();
        assert_eq!(next_due_time(&db).unwrap(), None);

        let never_run = create_backup_directory(&db, &settings("/a", "/b")).unwrap();
        let recent = create_backup_directory(&db, &settings("/c", "/d")).unwrap();
        set_last_finished_backup(&db, recent, 10_000).unwrap();

        let mut cursor = due_directories(&db, 10_500).unwrap();
        assert_eq!(cursor.row_count(), 1);
        let due = BackupDirectory::from_record(&cursor.next().unwrap().unwrap()).unwrap();
        assert_eq!(due.id, never_run);

        assert_eq!(due_directories(&db, 13_600).unwrap().row_count(), 2);
        assert_eq!(next_due_time(&db).unwrap(), Some(3600));
    }

    #[test]
    fn test_clear_last_finished_backup() {
        let db = Database::open(":memory:").unwrap();
        let first = create_backup_directory(&db, &settings("/a", "/b")).unwrap();
        let second = create_backup_directory(&db, &settings("/c", "/d")).unwrap();
        set_last_finished_backup(&db, first, 50_000).unwrap();
        set_last_finished_backup(&db, second, 50_000).unwrap();

        assert_eq!(clear_last_finished_backup(&db, Some(first)).unwrap(), 1);
        assert_eq!(backup_directory(&db, first).unwrap().unwrap().last_finished_backup, None);
        assert_eq!(
            backup_directory(&db, second).unwrap().unwrap().last_finished_backup,
            Some(50_000)
        );

        assert_eq!(clear_last_finished_backup(&db, None).unwrap(), 2);
        assert_eq!(backup_directory(&db, second).unwrap().unwrap().last_finished_backup, None);
    }

    #[test]
    fn test_file_lifecycle() {
        let db = Database::open(":memory:").unwrap();

        insert_file(&db, 1, "docs/a.txt", 100, 90).unwrap();
        let file = find_file(&db, 1, "docs/a.txt").unwrap().unwrap();
        assert_eq!(file.last_checked, 100);
        assert_eq!(file.remote_version, 90);
        assert!(find_file(&db, 2, "docs/a.txt").unwrap().is_none());

        update_file_version(&db, file.id, 200, 150).unwrap();
        let file = find_file(&db, 1, "docs/a.txt").unwrap().unwrap();
        assert_eq!((file.last_checked, file.remote_version), (200, 150));

        delete_file(&db, file.id).unwrap();
        assert!(find_file(&db, 1, "docs/a.txt").unwrap().is_none());
    }

    #[test]
    fn test_touch_files_and_removed_files() {
        let db = Database::open(":memory:").unwrap();
        for name in ["a", "b", "c"] {
            insert_file(&db, 1, name, 100, 1).unwrap();
        }
        insert_file(&db, 2, "other", 100, 1).unwrap();
        let ids: Vec<i64> = files_for_directory(&db, 1)
            .unwrap()
            .iter()
            .filter(|file| file.file_path != "b")
            .map(|file| file.id)
            .collect();

        assert_eq!(touch_files(&db, ids, 200).unwrap(), 2);
        assert_eq!(touch_files(&db, vec![], 200).unwrap(), 0);

        let mut removed = removed_files(&db, 1, 200).unwrap();
        assert_eq!(removed.row_count(), 1);
        let file = FileRecord::from_record(&removed.next().unwrap().unwrap()).unwrap();
        assert_eq!(file.file_path, "b");
    }

    #[test]
    fn test_history_expiry_query() {
        let db = Database::open(":memory:").unwrap();
        insert_history(&db, 1, "a.bkp.1.txt", "a.txt", 1_000).unwrap();
        insert_history(&db, 1, "a.bkp.2.txt", "a.txt", 2_000).unwrap();
        insert_history(&db, 2, "z.bkp.1.txt", "z.txt", 500).unwrap();

        let mut expired = expired_history(&db, 1, 1_500).unwrap();
        assert_eq!(expired.row_count(), 1);
        let entry = HistoryEntry::from_record(&expired.next().unwrap().unwrap()).unwrap();
        assert_eq!(entry.remote_file_path, "a.bkp.1.txt");

        delete_history(&db, entry.id).unwrap();
        let remaining = history_for_directory(&db, 1).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].version, 2_000);
    }

    #[test]
    fn test_delete_directory_removes_children() {
        let db = Database::open(":memory:").unwrap();
        let keep = create_backup_directory(&db, &settings("/a", "/b")).unwrap();
        let gone = create_backup_directory(&db, &settings("/c", "/d")).unwrap();
        insert_file(&db, gone, "x", 1, 1).unwrap();
        insert_history(&db, gone, "x.bkp", "x", 1).unwrap();
        insert_file(&db, keep, "y", 1, 1).unwrap();

        assert!(delete_backup_directory(&db, gone).unwrap());
        assert!(!delete_backup_directory(&db, gone).unwrap());

        let dirs = list_backup_directories(&db).unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].id, keep);
        assert!(files_for_directory(&db, gone).unwrap().is_empty());
        assert!(history_for_directory(&db, gone).unwrap().is_empty());
        assert_eq!(files_for_directory(&db, keep).unwrap().len(), 1);
    }

    #[test]
    fn test_update_directory_settings() {
        let db = Database::open(":memory:").unwrap();
        let id = create_backup_directory(&db, &settings("/a", "/b")).unwrap();

        let mut changed = settings("/a", "/b");
        changed.backup_interval = 60;
        changed.keep_history_duration = 0;
        changed.exclude_filter = "*.log".to_string();
        assert_eq!(update_backup_directory(&db, id, &changed).unwrap(), 1);

        let dir = backup_directory(&db, id).unwrap().unwrap();
        assert_eq!(dir.settings(), changed);
    }
}
