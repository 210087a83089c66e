use crate::models::config::Config;
use crate::models::error::{BackupError, Result};
use crate::utils::archive::{orig_path, rename_without_replacing};
use crate::utils::log_sink::LogSink;
use crate::utils::progress::{format_copy_progress, ProgressTicker};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions {
    pub buffer_size: usize,
    pub progress_interval: Duration,
}

impl CopyOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            buffer_size: config.copy_buffer_size.max(1),
            progress_interval: config.progress_log_interval(),
        }
    }
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Streams `source` into `target` and returns the number of bytes written.
///
/// A file already at `target` is moved aside to `<stem>.orig.<ext>` first; when
/// that name is taken too the copy fails and nothing is touched.
/// On a read or write error the partial target is removed.
pub fn copy_file(
    source: &Path,
    target: &Path,
    options: &CopyOptions,
    sink: &dyn LogSink,
) -> Result<u64> {
    if target.symlink_metadata().is_ok() {
        let moved_to = orig_path(target);
        sink.warning(format!(
            "File '{}' already exists, the old version will be renamed to '{}'",
            target.display(),
            moved_to.display()
        ));
        rename_without_replacing(target, &moved_to).map_err(|cause| BackupError::Rename {
            from: target.to_path_buf(),
            to: moved_to.clone(),
            cause,
        })?;
    }

    let mut reader = File::open(source).map_err(|cause| BackupError::OpenSource {
        path: source.to_path_buf(),
        cause,
    })?;
    let total = reader.metadata().map(|m| m.len()).unwrap_or(0);

    let mut writer = File::create(target).map_err(|cause| BackupError::OpenTarget {
        path: target.to_path_buf(),
        cause,
    })?;

    match stream(&mut reader, &mut writer, total, source, options, sink) {
        Ok(copied) => Ok(copied),
        Err(cause) => {
            drop(writer);
            let _ = fs::remove_file(target);
            Err(BackupError::FileCopy {
                from: source.to_path_buf(),
                to: target.to_path_buf(),
                cause,
            })
        }
    }
}

fn stream(
    reader: &mut impl Read,
    writer: &mut impl Write,
    total: u64,
    source: &Path,
    options: &CopyOptions,
    sink: &dyn LogSink,
) -> std::io::Result<u64> {
    let mut buffer = vec![0u8; options.buffer_size.max(1)];
    let mut ticker = ProgressTicker::new(options.progress_interval);
    let mut copied: u64 = 0;

    loop {
        let count = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => count,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..count])?;
        copied += count as u64;

        if ticker.tick() {
            sink.info(format!(
                "Copying '{}': {}",
                source.display(),
                format_copy_progress(copied, total)
            ));
        }
    }

    writer.flush()?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::log_sink::{BackupEvent, ChannelSink, LogLevel};
    use std::io;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn small_buffer() -> CopyOptions {
        CopyOptions {
            buffer_size: 7,
            progress_interval: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_copies_content_in_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source.bin");
        let target = temp_dir.path().join("target.bin");
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &content).unwrap();
        let (tx, rx) = mpsc::channel();

        let copied = copy_file(&source, &target, &small_buffer(), &ChannelSink::new(tx)).unwrap();

        assert_eq!(copied, 1000);
        assert_eq!(fs::read(&target).unwrap(), content);
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_existing_target_is_moved_to_orig() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.txt");
        let target_dir = temp_dir.path().join("backup");
        fs::create_dir(&target_dir).unwrap();
        let target = target_dir.join("a.txt");
        fs::write(&source, b"new").unwrap();
        fs::write(&target, b"in the way").unwrap();
        let (tx, rx) = mpsc::channel();

        copy_file(&source, &target, &small_buffer(), &ChannelSink::new(tx)).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert_eq!(fs::read(target_dir.join("a.orig.txt")).unwrap(), b"in the way");
        let events: Vec<BackupEvent> = rx.try_iter().collect();
        assert!(matches!(
            events.as_slice(),
            [BackupEvent::Log { level: LogLevel::Warning, message }] if message.contains("a.orig.txt")
        ));
    }

    #[test]
    fn test_taken_orig_name_fails_without_touching_files() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.txt");
        let target_dir = temp_dir.path().join("backup");
        fs::create_dir(&target_dir).unwrap();
        let target = target_dir.join("a.txt");
        let orig = target_dir.join("a.orig.txt");
        fs::write(&source, b"fresh").unwrap();
        fs::write(&target, b"stale").unwrap();
        fs::write(&orig, b"earlier orig").unwrap();
        let (tx, _rx) = mpsc::channel();

        let result = copy_file(&source, &target, &small_buffer(), &ChannelSink::new(tx));

        assert!(matches!(
            result,
            Err(BackupError::Rename { ref cause, .. }) if cause.kind() == io::ErrorKind::AlreadyExists
        ));
        assert_eq!(fs::read(&target).unwrap(), b"stale");
        assert_eq!(fs::read(&orig).unwrap(), b"earlier orig");
    }

    #[test]
    fn test_missing_source_leaves_no_target() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target.txt");
        let (tx, _rx) = mpsc::channel();

        let result = copy_file(
            &temp_dir.path().join("missing.txt"),
            &target,
            &small_buffer(),
            &ChannelSink::new(tx),
        );

        assert!(matches!(result, Err(BackupError::OpenSource { .. })));
        assert!(!target.exists());
    }

    #[test]
    fn test_missing_target_directory_fails_to_open() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.txt");
        fs::write(&source, b"x").unwrap();
        let (tx, _rx) = mpsc::channel();

        let result = copy_file(
            &source,
            &temp_dir.path().join("nope/a.txt"),
            &small_buffer(),
            &ChannelSink::new(tx),
        );

        assert!(matches!(result, Err(BackupError::OpenTarget { .. })));
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::other("disk went away"));
            }
            self.served = true;
            buf[..3].copy_from_slice(b"abc");
            Ok(3)
        }
    }

    #[test]
    fn test_stream_stops_on_read_error() {
        let mut written = Vec::new();
        let (tx, _rx) = mpsc::channel();

        let result = stream(
            &mut FailingReader { served: false },
            &mut written,
            10,
            Path::new("flaky"),
            &small_buffer(),
            &ChannelSink::new(tx),
        );

        assert!(result.is_err());
        assert_eq!(written, b"abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_read_error_removes_partial_target() {
        let temp_dir = TempDir::new().unwrap();
        let source_dir = temp_dir.path().join("not_a_file");
        fs::create_dir(&source_dir).unwrap();
        let target = temp_dir.path().join("target");
        let (tx, _rx) = mpsc::channel();

        let result = copy_file(&source_dir, &target, &small_buffer(), &ChannelSink::new(tx));

        assert!(matches!(result, Err(BackupError::FileCopy { .. })));
        assert!(!target.exists());
    }

    #[test]
    fn test_progress_is_logged_on_interval() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("big.bin");
        let target = temp_dir.path().join("big.copy");
        fs::write(&source, vec![1u8; 64]).unwrap();
        let options = CopyOptions {
            buffer_size: 16,
            progress_interval: Duration::ZERO,
        };
        let (tx, rx) = mpsc::channel();

        copy_file(&source, &target, &options, &ChannelSink::new(tx)).unwrap();

        let progress: Vec<BackupEvent> = rx.try_iter().collect();
        assert_eq!(progress.len(), 4);
        assert!(matches!(
            &progress[3],
            BackupEvent::Log { level: LogLevel::Info, message } if message.contains("(100%)")
        ));
    }
}
