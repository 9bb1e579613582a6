//! Change notification delivery.
//!
//! The watcher only knows the [`NotificationSink`] seam. The stock sink is a
//! [`NotificationBroadcaster`], a `tokio::sync::broadcast` channel that fans
//! each change out to every live subscriber without waiting on any of them.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::workspace::ThreadId;

/// Event name observers subscribe to.
pub const FILES_CHANGED_EVENT: &str = "workspace:files-changed";

/// What scheduled a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Trailing edge of a burst of native filesystem events
    Native,
    /// Safety poll tick
    Poll,
}

/// "Workspace of thread X may have changed, please refresh."
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceChange {
    pub thread_id: ThreadId,
    pub workspace_path: PathBuf,
    #[serde(skip)]
    pub source: ChangeSource,
}

/// Delivers change notifications to observers.
///
/// Implementations must return promptly and must treat "no observers" as a
/// successful no-op.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, change: WorkspaceChange);
}

impl<F> NotificationSink for F
where
    F: Fn(WorkspaceChange) + Send + Sync,
{
    fn notify(&self, change: WorkspaceChange) {
        self(change)
    }
}

/// Fans notifications out to any number of subscribers.
#[derive(Clone)]
pub struct NotificationBroadcaster {
    sender: broadcast::Sender<WorkspaceChange>,
}

impl NotificationBroadcaster {
    /// Create a broadcaster; slow subscribers lag past `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to receive notifications
    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceChange> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl NotificationSink for NotificationBroadcaster {
    fn notify(&self, change: WorkspaceChange) {
        let summary = format!(
            "{} {} ({:?})",
            change.thread_id,
            change.workspace_path.display(),
            change.source
        );
        match self.sender.send(change) {
            Ok(count) => {
                crate::debug_event!("broadcast", "sent", "{summary} to {count} subscribers");
            }
            Err(_) => {
                // No receivers, this is fine
                crate::debug_event!("broadcast", "dropped", "no subscribers for {summary}");
            }
        }
    }
}
