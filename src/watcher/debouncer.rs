//! Trailing-edge debouncing of native change events.
//!
//! Each thread has at most one pending timer. A new event aborts the pending
//! timer and schedules a fresh one, so a burst of events produces a single
//! notification `quiet_period` after the last event of the burst.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::notifications::{ChangeSource, NotificationSink, WorkspaceChange};
use crate::workspace::ThreadId;

/// A scheduled notification for one thread.
#[derive(Debug)]
struct PendingTimer {
    /// Distinguishes this timer from any that replaced it.
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-thread trailing-edge debouncer.
pub struct Debouncer {
    /// thread -> the one outstanding timer
    pending: Arc<DashMap<ThreadId, PendingTimer>>,
    next_generation: AtomicU64,
    quiet_period: Duration,
    sink: Arc<dyn NotificationSink>,
    runtime: Handle,
}

impl Debouncer {
    pub fn new(quiet_period: Duration, sink: Arc<dyn NotificationSink>, runtime: Handle) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            quiet_period,
            sink,
            runtime,
        }
    }

    /// Record a change for `thread_id`, restarting its quiet period.
    ///
    /// `watch` is the cancellation token of the thread's active watch. The
    /// check happens under the map entry lock, so once the watch is cancelled
    /// and [`Debouncer::cancel`] has run, no new timer can be scheduled.
    pub fn record(&self, thread_id: &ThreadId, workspace_path: &Path, watch: &CancellationToken) {
        let entry = self.pending.entry(thread_id.clone());
        if watch.is_cancelled() {
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = self.spawn_timer(
            generation,
            thread_id.clone(),
            workspace_path.to_path_buf(),
            watch.clone(),
        );
        let timer = PendingTimer { generation, handle };

        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.get().handle.abort();
                occupied.insert(timer);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
            }
        }
    }

    fn spawn_timer(
        &self,
        generation: u64,
        thread_id: ThreadId,
        workspace_path: PathBuf,
        watch: CancellationToken,
    ) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let sink = Arc::clone(&self.sink);
        let quiet_period = self.quiet_period;

        self.runtime.spawn(async move {
            tokio::time::sleep(quiet_period).await;

            // A replaced or cancelled timer no longer owns the entry
            let owned = pending
                .remove_if(&thread_id, |_, timer| timer.generation == generation)
                .is_some();
            if !owned || watch.is_cancelled() {
                return;
            }

            crate::debug_event!("debounce", "fired", "thread {thread_id}");
            sink.notify(WorkspaceChange {
                thread_id,
                workspace_path,
                source: ChangeSource::Native,
            });
        })
    }

    /// Drop the pending timer for `thread_id`, if any.
    pub fn cancel(&self, thread_id: &str) {
        if let Some((_, timer)) = self.pending.remove(thread_id) {
            timer.handle.abort();
            crate::debug_event!("debounce", "cancelled", "thread {thread_id}");
        }
    }

    /// Drop every pending timer.
    pub fn cancel_all(&self) {
        self.pending.retain(|_, timer| {
            timer.handle.abort();
            false
        });
    }

    pub fn is_pending(&self, thread_id: &str) -> bool {
        self.pending.contains_key(thread_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
