/*!
 * Recursive tree scanning
 *
 * Walks a root depth-first in lexicographic order and emits the filtered
 * set of regular files as `FileEntry` records. Symlinks are never
 * followed; unreadable directories produce warnings, not failures.
 */

use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use super::filter::SyncFilter;
use super::metadata::mtime_millis;
use crate::config::{SymlinkPolicy, SyncOptions};
use crate::error::{Result, SyncError};

/// One regular file discovered by a scan
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileEntry {
    /// Platform-canonical absolute path
    pub absolute_path: PathBuf,
    /// Path relative to the scan root, forward-slash separators
    pub relative_path: String,
    /// Byte count
    pub size: u64,
    /// Modification time, UTC milliseconds
    pub mtime_ms: i64,
    /// Set for the directory records kept for pattern matching
    pub is_directory: bool,
}

/// Everything a scan produced
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Filtered regular files, in lexicographic depth-first order
    pub entries: Vec<FileEntry>,
    /// Relative paths of traversed directories
    pub directories: Vec<String>,
    /// Relative paths of symlinks, when the policy records them
    pub symlinks: Vec<String>,
    /// Non-fatal problems encountered during the walk
    pub warnings: Vec<String>,
}

impl ScanOutcome {
    /// Total bytes across all entries
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Scan one root with the given filter
pub fn scan(root: &Path, filter: &SyncFilter, options: &SyncOptions) -> Result<ScanOutcome> {
    if !root.exists() {
        return Err(SyncError::PathMissing(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(SyncError::NotADirectory(root.to_path_buf()));
    }

    let mut outcome = ScanOutcome::default();

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .max_depth(options.max_scan_depth)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let message = format!("failed to read entry: {}", e);
                warn!("{}", message);
                outcome.warnings.push(message);
                continue;
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        let rel_path = match relative_path(entry.path(), root) {
            Some(rel) => rel,
            None => {
                let message = format!("dropping entry outside scan root: {:?}", entry.path());
                warn!("{}", message);
                outcome.warnings.push(message);
                continue;
            }
        };

        let file_type = entry.file_type();

        if file_type.is_symlink() {
            if options.symlink_policy == SymlinkPolicy::Record {
                outcome.symlinks.push(rel_path);
            }
            continue;
        }

        if file_type.is_dir() {
            if !filter.accepts_path(&rel_path, true) {
                walker.skip_current_dir();
                continue;
            }
            outcome.directories.push(rel_path);
            continue;
        }

        if !file_type.is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                let message = format!("failed to read metadata for {:?}: {}", entry.path(), e);
                warn!("{}", message);
                outcome.warnings.push(message);
                continue;
            }
        };

        let size = metadata.len();
        let mtime_ms = mtime_millis(&metadata);

        if filter.accepts_file(&rel_path, size, mtime_ms) {
            outcome.entries.push(FileEntry {
                absolute_path: entry.path().to_path_buf(),
                relative_path: rel_path,
                size,
                mtime_ms,
                is_directory: false,
            });
        }
    }

    Ok(outcome)
}

/// Scan both roots in parallel
pub fn scan_pair(
    root_a: &Path,
    root_b: &Path,
    filter_a: &SyncFilter,
    filter_b: &SyncFilter,
    options: &SyncOptions,
) -> (Result<ScanOutcome>, Result<ScanOutcome>) {
    rayon::join(
        || scan(root_a, filter_a, options),
        || scan(root_b, filter_b, options),
    )
}

/// Canonical relative path: forward slashes, no `..` or absolute parts
fn relative_path(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
