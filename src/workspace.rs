//! Thread identifiers and workspace directory primitives.
//!
//! The watcher only needs [`verify_directory`]. [`list_entries`] is the
//! enumeration capability downstream consumers call after a change
//! notification to refresh their view of the tree.

use std::borrow::Borrow;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::watcher::{EventFilter, WatchError};

/// Opaque session key. All watcher state is partitioned by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&ThreadId> for ThreadId {
    fn from(id: &ThreadId) -> Self {
        id.clone()
    }
}

impl AsRef<str> for ThreadId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets the per-thread maps be queried with a plain `&str`
impl Borrow<str> for ThreadId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Check that `path` exists and is a directory.
///
/// Relative paths are resolved against the current directory so the bound
/// workspace path is always absolute.
pub fn verify_directory(path: &Path) -> Result<PathBuf, WatchError> {
    let metadata = std::fs::metadata(path).map_err(|e| WatchError::PathInaccessible {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if !metadata.is_dir() {
        return Err(WatchError::NotADirectory {
            path: path.to_path_buf(),
        });
    }

    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        std::path::absolute(path).map_err(|e| WatchError::PathInaccessible {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// One entry of a workspace listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Path relative to the workspace root
    pub path: PathBuf,
    pub is_dir: bool,
    /// Size in bytes, files only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Modification time in milliseconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

/// Enumerate every entry under `root`, skipping what `filter` ignores.
///
/// Entries are sorted by path within each directory. Unreadable entries are
/// skipped; an unreadable root is an error.
pub fn list_entries(root: &Path, filter: &EventFilter) -> io::Result<Vec<FileInfo>> {
    let metadata = std::fs::metadata(root)?;
    if !metadata.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", root.display()),
        ));
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        // The root itself may be hidden; only judge what lies below it
        .filter_entry(|entry| {
            entry.depth() == 0 || !filter.is_ignored_name(&entry.file_name().to_string_lossy())
        });

    let mut entries = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                crate::debug_event!("workspace", "skipped", "{e}");
                continue;
            }
        };

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        let is_dir = entry.file_type().is_dir();
        let meta = entry.metadata().ok();

        entries.push(FileInfo {
            path: relative,
            is_dir,
            size: meta.as_ref().filter(|_| !is_dir).map(|m| m.len()),
            modified: meta
                .as_ref()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| u64::try_from(d.as_millis()).ok()),
        });
    }

    Ok(entries)
}
