use crate::models::backup_directory::BackupDirectory;
use crate::models::config::Config;
use crate::models::error::{BackupError, ErrorKind, Result};
use crate::models::file_record::FileRecord;
use crate::models::history_entry::HistoryEntry;
use crate::repo::queries;
use crate::repo::sqlite::Database;
use crate::service::copy::{copy_file, CopyOptions};
use crate::utils::archive::{
    archival_path, pass_time_suffix, prune_empty_parents, rename_without_replacing,
};
use crate::utils::cancel::CancellationToken;
use crate::utils::directory::{relative_path, ExcludeFilter, SourceFile, SourceWalker};
use crate::utils::log_sink::{BackupEvent, LogSink};
use crate::utils::progress::ProgressTicker;
use log::debug;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Totals of one pass over the due directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub pass_time: i64,
    pub directories_completed: usize,
    pub directories_skipped: usize,
    pub directories_failed: usize,
    pub files_checked: usize,
    pub files_copied: usize,
    pub versions_archived: usize,
    pub files_removed: usize,
    pub history_expired: usize,
    pub interrupted: bool,
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} directories backed up, {} skipped, {} failed; {} files checked, {} copied, \
             {} versions archived, {} removed, {} old backups deleted",
            self.directories_completed,
            self.directories_skipped,
            self.directories_failed,
            self.files_checked,
            self.files_copied,
            self.versions_archived,
            self.files_removed,
            self.history_expired
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Skipped,
    Interrupted,
}

/// Drives backup passes. Talks to the store only through [`Database`].
pub struct BackupManager {
    db: Database,
    config: Config,
    copy_options: CopyOptions,
    sink: Arc<dyn LogSink>,
    last_pass: AtomicI64,
}

impl BackupManager {
    pub fn new(db: Database, config: Config, sink: Arc<dyn LogSink>) -> Self {
        let copy_options = CopyOptions::from_config(&config);
        Self {
            db,
            config,
            copy_options,
            sink,
            last_pass: AtomicI64::new(0),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Runs one pass over every due directory, timestamped with the current time.
    pub fn check_for_backups(&self, token: &CancellationToken) -> Result<PassSummary> {
        self.check_for_backups_at(chrono::Utc::now().timestamp(), token)
    }

    /// Runs one pass as if the clock read `now`.
    ///
    /// Fails when the due directories cannot be read or the store goes away;
    /// other problems inside a directory are logged and counted in the summary.
    pub fn check_for_backups_at(&self, now: i64, token: &CancellationToken) -> Result<PassSummary> {
        let pass_time = self.claim_pass_time(now);
        let suffix = pass_time_suffix(pass_time);
        let mut summary = PassSummary {
            pass_time,
            ..PassSummary::default()
        };

        self.sink.info("Checking backups...".to_string());
        let mut due = queries::due_directories(&self.db, pass_time)?;
        debug!("{} directories due at {}", due.row_count(), pass_time);

        while let Some(record) = due.next()? {
            if token.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let directory = match BackupDirectory::from_record(&record) {
                Ok(directory) => directory,
                Err(e) => {
                    self.sink
                        .error(format!("Unreadable backup directory row: {}", e));
                    summary.directories_failed += 1;
                    continue;
                }
            };

            let mut run = DirectoryRun::new(self, &directory, pass_time, &suffix, token);
            let result = run.execute();
            run.add_to(&mut summary);
            match result {
                Ok(Outcome::Completed) => summary.directories_completed += 1,
                Ok(Outcome::Skipped) => summary.directories_skipped += 1,
                Ok(Outcome::Interrupted) => {
                    summary.interrupted = true;
                    break;
                }
                Err(e) => {
                    self.sink.error(format!(
                        "Backup of folder '{}' failed: {}",
                        directory.source_dir, e
                    ));
                    match e.kind() {
                        ErrorKind::Validation => summary.directories_skipped += 1,
                        ErrorKind::Io | ErrorKind::Storage => summary.directories_failed += 1,
                        ErrorKind::Fatal => return Err(e),
                    }
                }
            }
        }

        if summary.interrupted {
            self.sink.warning("Backup check interrupted".to_string());
        } else {
            self.sink.info(format!("Backup check finished: {}", summary));
        }
        Ok(summary)
    }

    /// Earliest time any directory becomes due.
    pub fn next_due_time(&self) -> Result<Option<i64>> {
        queries::next_due_time(&self.db)
    }

    /// Makes one directory, or all of them, due on the next pass.
    pub fn request_backup(&self, directory_id: Option<i64>) -> Result<usize> {
        queries::clear_last_finished_backup(&self.db, directory_id)
    }

    /// Pass timestamps never repeat, even for passes started within one second.
    fn claim_pass_time(&self, now: i64) -> i64 {
        let mut last = self.last_pass.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self.last_pass.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

#[derive(Debug, Default)]
struct RunStats {
    files_checked: usize,
    files_copied: usize,
    versions_archived: usize,
    files_removed: usize,
    history_expired: usize,
}

/// One directory inside one pass.
struct DirectoryRun<'a> {
    manager: &'a BackupManager,
    directory: &'a BackupDirectory,
    pass_time: i64,
    suffix: &'a str,
    token: &'a CancellationToken,
    source: PathBuf,
    remote: PathBuf,
    unchanged: Vec<i64>,
    ticker: ProgressTicker,
    stats: RunStats,
}

impl<'a> DirectoryRun<'a> {
    fn new(
        manager: &'a BackupManager,
        directory: &'a BackupDirectory,
        pass_time: i64,
        suffix: &'a str,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            manager,
            directory,
            pass_time,
            suffix,
            token,
            source: PathBuf::from(&directory.source_dir),
            remote: PathBuf::from(&directory.remote_dir),
            unchanged: Vec::new(),
            ticker: ProgressTicker::new(manager.config.progress_log_interval()),
            stats: RunStats::default(),
        }
    }

    fn db(&self) -> &Database {
        &self.manager.db
    }

    fn sink(&self) -> &dyn LogSink {
        self.manager.sink.as_ref()
    }

    fn add_to(&self, summary: &mut PassSummary) {
        summary.files_checked += self.stats.files_checked;
        summary.files_copied += self.stats.files_copied;
        summary.versions_archived += self.stats.versions_archived;
        summary.files_removed += self.stats.files_removed;
        summary.history_expired += self.stats.history_expired;
    }

    fn execute(&mut self) -> Result<Outcome> {
        if self.directory.source_dir.is_empty() || self.directory.remote_dir.is_empty() {
            self.sink().error(format!(
                "Backup directory {} has no source or backup folder set",
                self.directory.id
            ));
            return Ok(Outcome::Skipped);
        }

        self.sink()
            .info(format!("Backing up folder '{}'...", self.directory.source_dir));

        if !self.source.is_dir() {
            self.sink().error(format!(
                "Folder '{}' does not exist!",
                self.directory.source_dir
            ));
            return Ok(Outcome::Skipped);
        }

        if !self.remote.is_dir() {
            if let Err(cause) = fs::create_dir_all(&self.remote) {
                self.sink().error(format!(
                    "Backup folder '{}' does not exist and cannot be created: {}",
                    self.directory.remote_dir, cause
                ));
                return Ok(Outcome::Skipped);
            }
            self.sink().warning(format!(
                "Backup folder '{}' did not exist and was created",
                self.directory.remote_dir
            ));
        }

        let (filter, invalid) = ExcludeFilter::compile(&self.directory.exclude_filter);
        for pattern in invalid {
            self.sink()
                .warning(format!("Ignoring invalid exclude pattern {}", pattern));
        }

        let scanned = self.scan(&filter);
        self.flush_unchanged()?;
        if scanned? == Outcome::Interrupted {
            return Ok(Outcome::Interrupted);
        }

        if self.sweep_removed()? == Outcome::Interrupted {
            return Ok(Outcome::Interrupted);
        }

        if self.sweep_expired()? == Outcome::Interrupted {
            return Ok(Outcome::Interrupted);
        }

        queries::set_last_finished_backup(self.db(), self.directory.id, self.pass_time)?;
        self.sink().success(format!(
            "Backup of folder '{}' finished",
            self.directory.source_dir
        ));

        self.db().wait_job_done()?;
        self.sink().emit(BackupEvent::BackupFinished);
        Ok(Outcome::Completed)
    }

    fn scan(&mut self, filter: &ExcludeFilter) -> Result<Outcome> {
        for item in SourceWalker::new(&self.source) {
            if self.token.is_cancelled() {
                return Ok(Outcome::Interrupted);
            }

            if !self.remote.is_dir() {
                return Err(BackupError::Validation(format!(
                    "Backup folder '{}' is no longer available",
                    self.directory.remote_dir
                )));
            }

            let file = match item {
                Ok(file) => file,
                Err(e) => {
                    self.sink().warning(format!("Skipping unreadable entry: {}", e));
                    continue;
                }
            };

            if filter.is_excluded(&file.relative) {
                continue;
            }

            if self.ticker.tick() {
                self.sink().info(format!(
                    "Backing up '{}'; files checked: {}",
                    self.directory.source_dir, self.stats.files_checked
                ));
            }
            self.stats.files_checked += 1;

            match queries::find_file(self.db(), self.directory.id, &file.relative)? {
                None => self.back_up_new(&file)?,
                Some(record) if record.remote_version != file.modified => {
                    self.back_up_changed(&file, &record)?
                }
                Some(record) => self.mark_unchanged(record.id)?,
            }
        }

        Ok(Outcome::Completed)
    }

    fn back_up_new(&mut self, file: &SourceFile) -> Result<()> {
        let target = self.remote.join(&file.relative);
        self.sink()
            .info(format!("Backing up new file '{}'...", file.absolute.display()));

        if let Some(parent) = target.parent() {
            if let Err(cause) = fs::create_dir_all(parent) {
                self.sink().error(
                    BackupError::CreateDir {
                        path: parent.to_path_buf(),
                        cause,
                    }
                    .to_string(),
                );
                return Ok(());
            }
        }

        match copy_file(&file.absolute, &target, &self.manager.copy_options, self.sink()) {
            Ok(_) => {
                queries::insert_file(
                    self.db(),
                    self.directory.id,
                    &file.relative,
                    self.pass_time,
                    file.modified,
                )?;
                self.stats.files_copied += 1;
            }
            Err(e) => self.sink().error(e.to_string()),
        }
        Ok(())
    }

    fn back_up_changed(&mut self, file: &SourceFile, record: &FileRecord) -> Result<()> {
        let target = self.remote.join(&file.relative);
        self.sink().info(format!(
            "File '{}' changed, archiving the previous version...",
            file.absolute.display()
        ));

        match self.archive(&target, &file.relative) {
            Ok(true) => {}
            Ok(false) => self.sink().warning(format!(
                "Backup copy '{}' is missing, there is no previous version to keep",
                target.display()
            )),
            Err(e) => {
                // Keep the record alive so the removal sweep leaves it alone
                self.sink().error(e.to_string());
                return self.mark_unchanged(record.id);
            }
        }

        match copy_file(&file.absolute, &target, &self.manager.copy_options, self.sink()) {
            Ok(_) => {
                queries::update_file_version(self.db(), record.id, self.pass_time, file.modified)?;
                self.stats.files_copied += 1;
                Ok(())
            }
            Err(e) => {
                self.sink().error(e.to_string());
                self.mark_unchanged(record.id)
            }
        }
    }

    /// Moves the backup copy at `target` to its archival name and records it.
    /// `Ok(false)` when there was no copy to move. An archival name that is
    /// already taken is an error; the older version there is never replaced.
    fn archive(&mut self, target: &Path, original_file_path: &str) -> Result<bool> {
        let archived = archival_path(target, self.suffix);
        let renamed =
            rename_without_replacing(target, &archived).map_err(|cause| BackupError::Rename {
                from: target.to_path_buf(),
                to: archived.clone(),
                cause,
            });
        match renamed {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }

        let stored_path = relative_path(&self.remote, &archived)
            .unwrap_or_else(|| archived.to_string_lossy().into_owned());
        queries::insert_history(
            self.db(),
            self.directory.id,
            &stored_path,
            original_file_path,
            self.pass_time,
        )?;
        self.stats.versions_archived += 1;
        Ok(true)
    }

    fn mark_unchanged(&mut self, file_id: i64) -> Result<()> {
        self.unchanged.push(file_id);
        if self.unchanged.len() >= self.manager.config.unchanged_batch_size {
            self.flush_unchanged()?;
        }
        Ok(())
    }

    fn flush_unchanged(&mut self) -> Result<()> {
        let ids = std::mem::take(&mut self.unchanged);
        queries::touch_files(self.db(), ids, self.pass_time)?;
        Ok(())
    }

    fn sweep_removed(&mut self) -> Result<Outcome> {
        let mut removed = queries::removed_files(self.db(), self.directory.id, self.pass_time)?;

        while let Some(row) = removed.next()? {
            if self.token.is_cancelled() {
                return Ok(Outcome::Interrupted);
            }

            let file = FileRecord::from_record(&row)?;
            let target = self.remote.join(&file.file_path);
            self.sink().info(format!(
                "File '{}' was deleted, archiving its backup...",
                self.source.join(&file.file_path).display()
            ));

            match self.archive(&target, &file.file_path) {
                Ok(true) => {}
                Ok(false) => self.sink().warning(format!(
                    "Backup copy '{}' of a deleted file is missing",
                    target.display()
                )),
                Err(e) => {
                    self.sink().error(e.to_string());
                    continue;
                }
            }

            queries::delete_file(self.db(), file.id)?;
            self.stats.files_removed += 1;
        }

        Ok(Outcome::Completed)
    }

    fn sweep_expired(&mut self) -> Result<Outcome> {
        let cutoff = self.pass_time - self.directory.keep_history_duration;
        let mut expired = queries::expired_history(self.db(), self.directory.id, cutoff)?;

        while let Some(row) = expired.next()? {
            if self.token.is_cancelled() {
                return Ok(Outcome::Interrupted);
            }

            let entry = HistoryEntry::from_record(&row)?;
            let path = entry.archival_path(&self.remote);
            self.sink()
                .info(format!("Removing old backup '{}'", path.display()));

            queries::delete_history(self.db(), entry.id)?;
            if let Err(cause) = fs::remove_file(&path) {
                self.sink().error(format!(
                    "Failed to remove old backup '{}': {}",
                    path.display(),
                    cause
                ));
            }
            prune_empty_parents(&path, &self.remote);
            self.stats.history_expired += 1;
        }

        Ok(Outcome::Completed)
    }
}
