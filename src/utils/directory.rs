use crate::models::error::{BackupError, Result};
use glob::{MatchOptions, Pattern};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// A regular file found under a source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub absolute: PathBuf,
    /// Relative to the source root, `/` separated on every platform.
    pub relative: String,
    /// Modification time in epoch seconds.
    pub modified: i64,
}

/// Depth-first walk over the regular files of a tree. Symlinks are not followed.
pub struct SourceWalker {
    root: PathBuf,
    entries: walkdir::IntoIter,
}

impl SourceWalker {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            entries: WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        }
    }
}

impl Iterator for SourceWalker {
    type Item = Result<SourceFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(BackupError::Io(e.into()))),
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = match relative_path(&self.root, path) {
                Some(relative) => relative,
                None => continue,
            };

            return Some(modified_secs(path).map(|modified| SourceFile {
                absolute: path.to_path_buf(),
                relative,
                modified,
            }));
        }
    }
}

/// `path` relative to `root` with `/` separators, `None` outside `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let stripped = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = stripped
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Modification time of `path` in whole epoch seconds; negative before 1970.
pub fn modified_secs(path: &Path) -> Result<i64> {
    let modified = path
        .metadata()
        .and_then(|metadata| metadata.modified())
        .map_err(|cause| BackupError::MetadataError {
            path: path.to_path_buf(),
            cause,
        })?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    })
}

/// Newline separated globs, matched case-insensitively against relative paths.
/// `*` also matches `/`.
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<Pattern>,
}

impl ExcludeFilter {
    /// Compiles every non-blank line; the lines that are not valid globs come back
    /// alongside the filter so the caller can report them.
    pub fn compile(filter: &str) -> (Self, Vec<String>) {
        let mut patterns = Vec::new();
        let mut invalid = Vec::new();

        for line in filter.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            match Pattern::new(line) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => invalid.push(format!("{} ({})", line, e)),
            }
        }

        (Self { patterns }, invalid)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_excluded(&self, relative: &str) -> bool {
        const OPTIONS: MatchOptions = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_with(relative, OPTIONS))
    }
}
