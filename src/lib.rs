//! Workspace change notification for thread-scoped directory trees.
//!
//! Each logical session ("thread") owns at most one watched workspace.
//! Native filesystem events are filtered and coalesced into a single
//! trailing-edge notification, and a safety poll keeps observers current
//! when native notification goes quiet.

pub mod cli;
pub mod config;
pub mod logging;
pub mod notifications;
pub mod watcher;
pub mod workspace;

pub use config::{LoggingConfig, Settings, WatchConfig};
pub use notifications::{NotificationBroadcaster, NotificationSink, WorkspaceChange};
pub use watcher::{WatchError, WorkspaceWatcher, WorkspaceWatcherBuilder};
pub use workspace::{FileInfo, ThreadId};
