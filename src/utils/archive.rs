use chrono::{Local, TimeZone};
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix shared by every archival file of one pass: local time as `YYYYMMDDhhmmss`.
pub fn pass_time_suffix(pass_time: i64) -> String {
    match Local.timestamp_opt(pass_time, 0).earliest() {
        Some(time) => time.format("%Y%m%d%H%M%S").to_string(),
        None => pass_time.to_string(),
    }
}

/// `<stem>.bkp.<suffix>.<ext>`, or `<name>.bkp.<suffix>` without an extension.
pub fn archival_file_name(file_name: &str, suffix: &str) -> String {
    insert_marker(file_name, &format!("bkp.{}", suffix))
}

/// Archival location next to `path`.
pub fn archival_path(path: &Path, suffix: &str) -> PathBuf {
    sibling(path, |name| archival_file_name(name, suffix))
}

/// `<stem>.orig.<ext>` next to `path`; where a file that was in the way is moved.
pub fn orig_path(path: &Path) -> PathBuf {
    sibling(path, |name| insert_marker(name, "orig"))
}

fn sibling(path: &Path, rename: impl Fn(&str) -> String) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(rename(&name))
}

fn insert_marker(file_name: &str, marker: &str) -> String {
    let path = Path::new(file_name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{}.{}.{}",
            stem.to_string_lossy(),
            marker,
            ext.to_string_lossy()
        ),
        _ => format!("{}.{}", file_name, marker),
    }
}

/// Renames `from` to `to` unless something already lives at `to`.
///
/// A missing `from` fails with `NotFound`, an occupied `to` with `AlreadyExists`.
pub fn rename_without_replacing(from: &Path, to: &Path) -> io::Result<()> {
    from.symlink_metadata()?;
    if to.symlink_metadata().is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("'{}' already exists", to.display()),
        ));
    }
    fs::rename(from, to)
}

/// Removes the empty directories between `path` and `root`, deepest first.
/// Stops at the first directory that is not empty; `root` itself is kept.
pub fn prune_empty_parents(path: &Path, root: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if !dir.starts_with(root) || dir == root {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        debug!("Removed empty directory {}", dir.display());
        current = dir.parent();
    }
}
