//! Error types for the workspace watcher.
//!
//! None of these escape the public watcher operations; they are logged at the
//! boundary and callers observe the outcome through `is_watching`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Cannot access path {path}: {reason}")]
    PathInaccessible { path: PathBuf, reason: String },

    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
