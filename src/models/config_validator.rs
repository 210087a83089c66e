use crate::models::backup_directory::BackupDirectorySettings;
use crate::models::config::Config;
use crate::models::error::{BackupError, Result};
use log::{info, warn};
use std::fs;
use std::path::Path;

const RECOMMENDED_MIN_BUFFER: usize = 4 * 1024;
const RECOMMENDED_MAX_BUFFER: usize = 64 * 1024;
/// Upper bound for intervals and retention: a hundred years.
const MAX_SCHEDULE_SECS: i64 = 100 * 365 * 24 * 3600;

/// Validates the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    info!("Validating configuration...");

    validate_numeric_values(config)?;

    validate_database_path(&config.database_file)?;

    info!("Configuration validation passed");
    Ok(())
}

/// Validate numeric configuration values
fn validate_numeric_values(config: &Config) -> Result<()> {
    if config.unchanged_batch_size == 0 {
        return Err(BackupError::Validation(
            "unchanged_batch_size must be greater than 0".to_string(),
        ));
    }

    if config.copy_buffer_size == 0 {
        return Err(BackupError::Validation(
            "copy_buffer_size must be greater than 0".to_string(),
        ));
    }

    if config.min_check_interval_secs == 0 {
        return Err(BackupError::Validation(
            "min_check_interval_secs must be greater than 0".to_string(),
        ));
    }

    if config.progress_log_interval_secs == 0 {
        return Err(BackupError::Validation(
            "progress_log_interval_secs must be greater than 0".to_string(),
        ));
    }

    if !(RECOMMENDED_MIN_BUFFER..=RECOMMENDED_MAX_BUFFER).contains(&config.copy_buffer_size) {
        warn!(
            "copy_buffer_size ({}) is outside the recommended range of {} to {} bytes.",
            config.copy_buffer_size, RECOMMENDED_MIN_BUFFER, RECOMMENDED_MAX_BUFFER
        );
    }

    Ok(())
}

/// Validate database file path
fn validate_database_path(db_file: &str) -> Result<()> {
    if db_file.is_empty() {
        return Err(BackupError::Validation(
            "database_file cannot be empty. Provide a valid path or use ':memory:'".to_string(),
        ));
    }

    if db_file == ":memory:" {
        info!("Using in-memory database");
        return Ok(());
    }

    let path = Path::new(db_file);

    if path.exists() {
        if !path.is_file() {
            return Err(BackupError::Validation(format!(
                "Database path exists but is not a file: {}",
                db_file
            )));
        }

        if let Err(e) = fs::OpenOptions::new().read(true).write(true).open(path) {
            return Err(BackupError::Validation(format!(
                "Database file is not readable/writable: {}\nError: {}",
                db_file, e
            )));
        }
    } else {
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        // An empty parent is the current directory
        if parent.as_os_str().is_empty() {
            return Ok(());
        }

        if !parent.exists() {
            #[cfg(windows)]
            let suggestion = format!("mkdir \"{}\"", parent.display());
            #[cfg(not(windows))]
            let suggestion = format!("mkdir -p \"{}\"", parent.display());

            return Err(BackupError::Validation(format!(
                "Database parent directory does not exist: {}\nSuggestion: Create the directory with: {}",
                db_file, suggestion
            )));
        }

        if let Err(e) = check_writable(parent) {
            return Err(BackupError::Validation(format!(
                "Database parent directory is not writable: {}\nError: {}",
                db_file, e
            )));
        }
    }

    Ok(())
}

/// Checks a backup directory about to be created. Both folders must exist and the
/// backup folder must be empty so nothing already there gets mistaken for a backup.
pub fn validate_new_backup_directory(settings: &BackupDirectorySettings) -> Result<()> {
    validate_backup_directory(settings)?;

    let remote = Path::new(&settings.remote_dir);
    let mut entries = fs::read_dir(remote).map_err(|e| {
        BackupError::Validation(format!(
            "Backup folder is not readable: {}\nError: {}",
            settings.remote_dir, e
        ))
    })?;
    if entries.next().is_some() {
        return Err(BackupError::Validation(format!(
            "Backup folder '{}' is not empty!",
            settings.remote_dir
        )));
    }

    Ok(())
}

/// Checks the folders and the schedule of a backup directory.
pub fn validate_backup_directory(settings: &BackupDirectorySettings) -> Result<()> {
    check_existing_dir("Source folder", &settings.source_dir)?;
    check_existing_dir("Backup folder", &settings.remote_dir)?;

    let remote = Path::new(&settings.remote_dir);
    if let Err(e) = check_writable(remote) {
        return Err(BackupError::Validation(format!(
            "Backup folder is not writable: {}\nError: {}",
            settings.remote_dir, e
        )));
    }

    validate_schedule(settings)
}

/// Checks interval and retention only; the folders may be offline.
pub fn validate_schedule(settings: &BackupDirectorySettings) -> Result<()> {
    if settings.backup_interval <= 0 {
        return Err(BackupError::Validation(
            "Backup interval must be greater than 0".to_string(),
        ));
    }

    if settings.keep_history_duration < 0 {
        return Err(BackupError::Validation(
            "History retention cannot be negative".to_string(),
        ));
    }

    if settings.backup_interval > MAX_SCHEDULE_SECS
        || settings.keep_history_duration > MAX_SCHEDULE_SECS
    {
        return Err(BackupError::Validation(format!(
            "Backup interval and history retention cannot exceed {} seconds",
            MAX_SCHEDULE_SECS
        )));
    }

    Ok(())
}

fn check_existing_dir(label: &str, dir: &str) -> Result<()> {
    if dir.is_empty() {
        return Err(BackupError::Validation(format!("{} is not set", label)));
    }

    let path = Path::new(dir);
    if !path.exists() {
        #[cfg(windows)]
        let suggestion = format!("mkdir \"{}\"", dir);
        #[cfg(not(windows))]
        let suggestion = format!("mkdir -p \"{}\"", dir);

        return Err(BackupError::Validation(format!(
            "{} '{}' does not exist\nSuggestion: Create the directory with: {}",
            label, dir, suggestion
        )));
    }

    if !path.is_dir() {
        return Err(BackupError::Validation(format!(
            "{} '{}' is not a directory",
            label, dir
        )));
    }

    Ok(())
}

/// Check if a directory is writable by attempting to create a temporary file
fn check_writable(path: &Path) -> std::io::Result<()> {
    let test_file = path.join(".strawbackup_write_test");

    fs::write(&test_file, b"test")?;

    fs::remove_file(&test_file)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_for(source: &Path, remote: &Path) -> BackupDirectorySettings {
        BackupDirectorySettings {
            source_dir: source.to_str().unwrap().to_string(),
            remote_dir: remote.to_str().unwrap().to_string(),
            ..BackupDirectorySettings::default()
        }
    }

    #[test]
    fn test_check_writable_temp_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(check_writable(temp_dir.path()).is_ok());
        assert!(!temp_dir.path().join(".strawbackup_write_test").exists());
    }

    #[test]
    fn test_validate_numeric_values_zero_batch() {
        let mut config = Config::default();
        config.unchanged_batch_size = 0;

        let result = validate_numeric_values(&config);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("unchanged_batch_size"));
    }

    #[test]
    fn test_large_copy_buffer_only_warns() {
        let mut config = Config::default();
        config.copy_buffer_size = 8 * 1024 * 1024;

        assert!(validate_numeric_values(&config).is_ok());
    }

    #[test]
    fn test_validates_in_memory_database() {
        let mut config = Config::default();
        config.database_file = ":memory:".to_string();

        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_empty_database_path() {
        let mut config = Config::default();
        config.database_file = String::new();

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_database_in_missing_directory() {
        let mut config = Config::default();
        config.database_file = "/this/does/not/exist/db.sqlite".to_string();

        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_accepts_new_backup_directory() {
        let source = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();

        let result = validate_new_backup_directory(&settings_for(source.path(), remote.path()));
        assert!(result.is_ok());
    }

    #[test]
    fn test_rejects_missing_source_directory() {
        let remote = TempDir::new().unwrap();

        let result = validate_new_backup_directory(&settings_for(
            Path::new("/this/does/not/exist"),
            remote.path(),
        ));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_rejects_non_empty_backup_folder() {
        let source = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        fs::write(remote.path().join("leftover.txt"), b"x").unwrap();

        let result = validate_new_backup_directory(&settings_for(source.path(), remote.path()));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not empty"));

        // Existing directories may keep whatever their backup folder holds
        assert!(validate_backup_directory(&settings_for(source.path(), remote.path())).is_ok());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let source = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let mut settings = settings_for(source.path(), remote.path());
        settings.backup_interval = 0;

        let result = validate_backup_directory(&settings);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("interval"));
    }

    #[test]
    fn test_schedule_ignores_offline_folders() {
        let mut settings = settings_for(
            Path::new("/this/does/not/exist"),
            Path::new("/neither/does/this"),
        );
        settings.backup_interval = 900;

        assert!(validate_schedule(&settings).is_ok());
        assert!(validate_backup_directory(&settings).is_err());
    }

    #[test]
    fn test_rejects_absurd_schedule() {
        let mut settings = BackupDirectorySettings::default();
        settings.backup_interval = i64::MAX;
        assert!(validate_schedule(&settings).is_err());

        settings.backup_interval = 3600;
        settings.keep_history_duration = MAX_SCHEDULE_SECS + 1;
        assert!(validate_schedule(&settings).is_err());

        settings.keep_history_duration = MAX_SCHEDULE_SECS;
        assert!(validate_schedule(&settings).is_ok());
    }
}
