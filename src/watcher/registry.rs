//! Registry of per-thread workspace watches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use notify::{Event, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::notifications::{ChangeSource, NotificationSink, WorkspaceChange};
use crate::workspace::{ThreadId, verify_directory};

use super::debouncer::Debouncer;
use super::error::WatchError;
use super::filter::{EventFilter, WatchRoot};

/// Everything one thread's watch owns.
struct WatchHandle {
    workspace_path: PathBuf,
    /// Dropping it releases the native watch.
    _watcher: notify::RecommendedWatcher,
    /// Shared with the forwarder, poll task and debounce timers.
    cancel: CancellationToken,
    forwarder: JoinHandle<()>,
    /// Absent when polling is disabled (zero interval).
    poll: Option<JoinHandle<()>>,
}

/// Registry entry for one thread.
enum Slot {
    /// Reserved by a `start_watching` whose native install runs unlocked.
    Installing(u64),
    Active(WatchHandle),
}

impl WatchHandle {
    fn shutdown(self) {
        self.cancel.cancel();
        self.forwarder.abort();
        if let Some(poll) = self.poll {
            poll.abort();
        }
    }
}

/// Watches one workspace directory per thread and reports changes to a sink.
///
/// Native events are filtered, then debounced per thread; independently, a
/// safety poll notifies on a fixed cadence so observers stay current even
/// when native notification stops delivering events.
///
/// All operations are infallible from the caller's point of view. Failures
/// are logged, and `is_watching` tells whether a watch is installed.
///
/// Must be constructed inside a tokio runtime (or given one through the
/// builder); timers and forwarders are spawned on it.
pub struct WorkspaceWatcher {
    /// thread -> watch slot. The lock serialises start/stop/stop-all but is
    /// never held across a native install.
    watches: Mutex<HashMap<ThreadId, Slot>>,
    next_reservation: AtomicU64,
    debouncer: Arc<Debouncer>,
    filter: Arc<EventFilter>,
    sink: Arc<dyn NotificationSink>,
    poll_interval: Duration,
    channel_capacity: usize,
    runtime: Handle,
}

impl WorkspaceWatcher {
    /// Create a builder for configuring the watcher.
    pub fn builder() -> WorkspaceWatcherBuilder {
        WorkspaceWatcherBuilder::new()
    }

    /// Create a watcher on the current tokio runtime.
    pub fn new(sink: Arc<dyn NotificationSink>, config: WatchConfig) -> Result<Self, WatchError> {
        Self::builder().sink(sink).config(config).build()
    }

    /// Start watching `workspace_path` for `thread_id`, replacing any existing watch.
    ///
    /// A missing or non-directory path is logged and leaves the thread unwatched.
    pub fn start_watching(&self, thread_id: impl Into<ThreadId>, workspace_path: impl AsRef<Path>) {
        let thread_id = thread_id.into();
        let workspace_path = workspace_path.as_ref();

        if thread_id.is_empty() {
            tracing::warn!(
                "[watcher] refusing to watch {} for an empty thread id",
                workspace_path.display()
            );
            return;
        }

        let reservation = self.reserve(&thread_id);

        let workspace_path = match verify_directory(workspace_path) {
            Ok(path) => path,
            Err(e) => {
                self.release(&thread_id, reservation);
                tracing::warn!("[watcher] not watching thread {thread_id}: {e}");
                return;
            }
        };

        let installed = self.install(&thread_id, &workspace_path);
        self.commit(&thread_id, reservation, installed);
    }

    /// Stop the watch for `thread_id`. No-op when the thread is not watched.
    pub fn stop_watching(&self, thread_id: &str) {
        let mut watches = self.watches.lock();
        self.stop_locked(&mut watches, thread_id);
    }

    /// Stop every watch; used at shutdown.
    pub fn stop_all_watching(&self) {
        let mut watches = self.watches.lock();

        let mut count = 0;
        for (_thread_id, slot) in watches.drain() {
            if let Slot::Active(handle) = slot {
                handle.shutdown();
                count += 1;
            }
        }
        self.debouncer.cancel_all();

        if count > 0 {
            crate::log_event!("watcher", "stopped all", "{count} watches");
        }
    }

    /// Whether a watch is currently installed for `thread_id`.
    pub fn is_watching(&self, thread_id: &str) -> bool {
        matches!(self.watches.lock().get(thread_id), Some(Slot::Active(_)))
    }

    /// Workspace bound to `thread_id`, if watched.
    pub fn workspace_path(&self, thread_id: &str) -> Option<PathBuf> {
        match self.watches.lock().get(thread_id) {
            Some(Slot::Active(handle)) => Some(handle.workspace_path.clone()),
            _ => None,
        }
    }

    /// Watched threads in sorted order.
    pub fn watched_threads(&self) -> Vec<ThreadId> {
        let mut threads: Vec<ThreadId> = self
            .watches
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
            .map(|(thread_id, _)| thread_id.clone())
            .collect();
        threads.sort();
        threads
    }

    /// Release the native watch, poll task and pending debounce for one thread.
    fn stop_locked(&self, watches: &mut HashMap<ThreadId, Slot>, thread_id: &str) {
        if let Some(Slot::Active(handle)) = watches.remove(thread_id) {
            handle.shutdown();
            crate::log_event!("watcher", "stopped", "thread {thread_id}");
        }
        self.debouncer.cancel(thread_id);
    }

    /// Tear down any existing watch and claim the slot for a new install.
    fn reserve(&self, thread_id: &ThreadId) -> u64 {
        let reservation = self.next_reservation.fetch_add(1, Ordering::Relaxed);
        let mut watches = self.watches.lock();
        self.stop_locked(&mut watches, thread_id.as_str());
        watches.insert(thread_id.clone(), Slot::Installing(reservation));
        reservation
    }

    /// Drop the reservation if nothing has replaced it.
    fn release(&self, thread_id: &ThreadId, reservation: u64) {
        let mut watches = self.watches.lock();
        if is_reserved(&watches, thread_id, reservation) {
            watches.remove(thread_id.as_str());
        }
    }

    /// Insert an installed watch if its reservation is still current.
    ///
    /// A stop or newer start that ran during the install wins; the late
    /// handle is shut down instead.
    fn commit(
        &self,
        thread_id: &ThreadId,
        reservation: u64,
        installed: Result<WatchHandle, WatchError>,
    ) {
        let handle = match installed {
            Ok(handle) => handle,
            Err(e) => {
                self.release(thread_id, reservation);
                tracing::error!("[watcher] failed to start watching for thread {thread_id}: {e}");
                return;
            }
        };

        let mut watches = self.watches.lock();
        if !is_reserved(&watches, thread_id, reservation) {
            drop(watches);
            handle.shutdown();
            crate::debug_event!("watcher", "superseded", "thread {thread_id}");
            return;
        }

        crate::log_event!(
            "watcher",
            "started",
            "{} for thread {thread_id}",
            handle.workspace_path.display()
        );
        watches.insert(thread_id.clone(), Slot::Active(handle));
    }

    /// Install the native watch and spawn the forwarder and poll tasks.
    ///
    /// Tasks are spawned only after the native watch is in place, so a failure
    /// leaves nothing running.
    fn install(&self, thread_id: &ThreadId, workspace_path: &Path) -> Result<WatchHandle, WatchError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let callback_thread = thread_id.clone();
        let filter = Arc::clone(&self.filter);
        let root = WatchRoot::new(workspace_path);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = &res {
                if !filter.accepts(&root, event) {
                    tracing::trace!("[watcher] filtered {:?} {:?}", event.kind, event.paths);
                    return;
                }
            }
            match tx.try_send(res) {
                // Only accepted events are queued; a queued one restarts the quiet period
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => {
                    tracing::trace!("[watcher] event after shutdown for thread {callback_thread}");
                }
            }
        })?;

        watcher
            .watch(workspace_path, RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: workspace_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let cancel = CancellationToken::new();

        let forwarder = self.runtime.spawn(forward_events(
            thread_id.clone(),
            workspace_path.to_path_buf(),
            rx,
            Arc::clone(&self.debouncer),
            cancel.clone(),
        ));

        let poll = (!self.poll_interval.is_zero()).then(|| {
            self.runtime.spawn(poll_workspace(
                thread_id.clone(),
                workspace_path.to_path_buf(),
                self.poll_interval,
                Arc::clone(&self.sink),
                cancel.clone(),
            ))
        });

        Ok(WatchHandle {
            workspace_path: workspace_path.to_path_buf(),
            _watcher: watcher,
            cancel,
            forwarder,
            poll,
        })
    }
}

impl Drop for WorkspaceWatcher {
    fn drop(&mut self) {
        self.stop_all_watching();
    }
}

/// Drain filtered native events for one watch into the debouncer.
async fn forward_events(
    thread_id: ThreadId,
    workspace_path: PathBuf,
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    debouncer: Arc<Debouncer>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            res = rx.recv() => match res {
                Some(res) => handle_event(&thread_id, &workspace_path, res, &debouncer, &cancel),
                None => break,
            },
        }
    }
}

/// Route one native result.
///
/// Errors from the native backend are logged and the watch stays up; the
/// safety poll keeps observers informed meanwhile.
fn handle_event(
    thread_id: &ThreadId,
    workspace_path: &Path,
    res: notify::Result<Event>,
    debouncer: &Debouncer,
    cancel: &CancellationToken,
) {
    match res {
        Ok(event) => {
            crate::debug_event!(
                "watcher",
                "event",
                "{:?} {:?} in thread {thread_id}",
                event.kind,
                event.paths
            );
            debouncer.record(thread_id, workspace_path, cancel);
        }
        Err(e) => {
            let error = WatchError::EventError {
                details: e.to_string(),
            };
            tracing::error!(
                "[watcher] error watching {}: {error}",
                workspace_path.display()
            );
        }
    }
}

fn is_reserved(watches: &HashMap<ThreadId, Slot>, thread_id: &ThreadId, reservation: u64) -> bool {
    matches!(
        watches.get(thread_id.as_str()),
        Some(Slot::Installing(current)) if *current == reservation
    )
}

/// Notify on every tick until cancelled, regardless of native events.
async fn poll_workspace(
    thread_id: ThreadId,
    workspace_path: PathBuf,
    period: Duration,
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                sink.notify(WorkspaceChange {
                    thread_id: thread_id.clone(),
                    workspace_path: workspace_path.clone(),
                    source: ChangeSource::Poll,
                });
            }
        }
    }
}

/// Builder for constructing a [`WorkspaceWatcher`].
pub struct WorkspaceWatcherBuilder {
    sink: Option<Arc<dyn NotificationSink>>,
    config: WatchConfig,
    runtime: Option<Handle>,
}

impl WorkspaceWatcherBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            sink: None,
            config: WatchConfig::default(),
            runtime: None,
        }
    }

    /// Set the notification sink.
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace all watch settings at once.
    pub fn config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the quiet period in milliseconds.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    /// Set the safety poll interval in milliseconds; zero disables polling.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn skip_hidden(mut self, skip: bool) -> Self {
        self.config.skip_hidden = skip;
        self
    }

    pub fn ignored_dirs(mut self, dirs: Vec<String>) -> Self {
        self.config.ignored_dirs = dirs;
        self
    }

    /// Spawn timers on this runtime instead of the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the WorkspaceWatcher.
    pub fn build(self) -> Result<WorkspaceWatcher, WatchError> {
        let sink = self.sink.ok_or_else(|| WatchError::InitFailed {
            reason: "Notification sink is required".to_string(),
        })?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| WatchError::InitFailed {
                reason: format!("No tokio runtime: {e}"),
            })?,
        };

        let debouncer = Debouncer::new(self.config.debounce(), Arc::clone(&sink), runtime.clone());

        Ok(WorkspaceWatcher {
            watches: Mutex::new(HashMap::new()),
            next_reservation: AtomicU64::new(0),
            debouncer: Arc::new(debouncer),
            filter: Arc::new(EventFilter::from_config(&self.config)),
            sink,
            poll_interval: self.config.poll_interval(),
            channel_capacity: self.config.channel_capacity.max(1),
            runtime,
        })
    }
}

impl Default for WorkspaceWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quiet_sink() -> Arc<dyn NotificationSink> {
        Arc::new(|_change: WorkspaceChange| {})
    }

    #[test]
    fn test_build_requires_sink() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = WorkspaceWatcher::builder().runtime(rt.handle().clone()).build();
        assert!(matches!(result, Err(WatchError::InitFailed { .. })));
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = WorkspaceWatcher::builder().sink(quiet_sink()).build();
        assert!(matches!(result, Err(WatchError::InitFailed { .. })));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = WorkspaceWatcher::new(quiet_sink(), WatchConfig::default()).unwrap();

        watcher.start_watching("abc", temp_dir.path());
        assert!(watcher.is_watching("abc"));
        assert_eq!(watcher.workspace_path("abc").as_deref(), Some(temp_dir.path()));

        watcher.stop_watching("abc");
        assert!(!watcher.is_watching("abc"));
        assert_eq!(watcher.workspace_path("abc"), None);

        // Idempotent
        watcher.stop_watching("abc");
        watcher.stop_watching("never-watched");
    }

    #[tokio::test]
    async fn test_empty_thread_id_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = WorkspaceWatcher::new(quiet_sink(), WatchConfig::default()).unwrap();

        watcher.start_watching("", temp_dir.path());
        assert!(watcher.watched_threads().is_empty());
    }

    #[tokio::test]
    async fn test_file_path_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let watcher = WorkspaceWatcher::new(quiet_sink(), WatchConfig::default()).unwrap();

        watcher.start_watching("abc", &file);
        assert!(!watcher.is_watching("abc"));
    }

    #[tokio::test]
    async fn test_failed_restart_leaves_thread_unwatched() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = WorkspaceWatcher::new(quiet_sink(), WatchConfig::default()).unwrap();

        watcher.start_watching("abc", temp_dir.path());
        assert!(watcher.is_watching("abc"));

        // The old watch is torn down before the new path is verified
        watcher.start_watching("abc", temp_dir.path().join("missing"));
        assert!(!watcher.is_watching("abc"));
    }

    #[tokio::test]
    async fn test_watched_threads_sorted() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let watcher = WorkspaceWatcher::new(quiet_sink(), WatchConfig::default()).unwrap();

        watcher.start_watching("zeta", a.path());
        watcher.start_watching("alpha", b.path());

        assert_eq!(
            watcher.watched_threads(),
            vec![ThreadId::from("alpha"), ThreadId::from("zeta")]
        );

        watcher.stop_all_watching();
        assert!(watcher.watched_threads().is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_with_no_watches() {
        let watcher = WorkspaceWatcher::new(quiet_sink(), WatchConfig::default()).unwrap();
        watcher.stop_all_watching();
        watcher.stop_all_watching();
        assert!(watcher.watched_threads().is_empty());
    }

    fn recording_sink() -> (Arc<dyn NotificationSink>, Arc<Mutex<Vec<WorkspaceChange>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink: Arc<dyn NotificationSink> =
            Arc::new(move |change: WorkspaceChange| captured.lock().push(change));
        (sink, seen)
    }

    fn active_token(watcher: &WorkspaceWatcher, thread_id: &str) -> CancellationToken {
        match watcher.watches.lock().get(thread_id) {
            Some(Slot::Active(handle)) => handle.cancel.clone(),
            _ => panic!("thread {thread_id} is not watched"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_error_keeps_watch_alive() {
        let temp_dir = TempDir::new().unwrap();
        let (sink, seen) = recording_sink();
        let watcher = WorkspaceWatcher::builder()
            .sink(sink)
            .debounce_ms(100)
            .poll_interval_ms(0)
            .build()
            .unwrap();

        watcher.start_watching("abc", temp_dir.path());
        let cancel = active_token(&watcher, "abc");
        let thread_id = ThreadId::from("abc");

        handle_event(
            &thread_id,
            temp_dir.path(),
            Err(notify::Error::generic("event queue overflow")),
            &watcher.debouncer,
            &cancel,
        );
        assert!(watcher.is_watching("abc"));
        assert!(!watcher.debouncer.is_pending("abc"));

        let event = Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(temp_dir.path().join("main.rs"));
        handle_event(&thread_id, temp_dir.path(), Ok(event), &watcher.debouncer, &cancel);
        assert!(watcher.debouncer.is_pending("abc"));

        tokio::time::sleep(Duration::from_millis(150)).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].thread_id, thread_id);
        assert_eq!(seen[0].source, ChangeSource::Native);
        drop(seen);
        assert!(watcher.is_watching("abc"));
    }

    #[tokio::test]
    async fn test_install_failure_leaves_no_entry() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = WorkspaceWatcher::new(quiet_sink(), WatchConfig::default()).unwrap();
        let thread_id = ThreadId::from("abc");

        let reservation = watcher.reserve(&thread_id);
        assert!(!watcher.is_watching("abc"));

        let installed = watcher.install(&thread_id, &temp_dir.path().join("missing"));
        assert!(matches!(installed, Err(WatchError::PathWatchFailed { .. })));

        watcher.commit(&thread_id, reservation, installed);
        assert!(watcher.watches.lock().is_empty());
        assert!(!watcher.debouncer.is_pending("abc"));
    }

    #[tokio::test]
    async fn test_newer_start_wins_over_late_install() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let watcher = WorkspaceWatcher::new(quiet_sink(), WatchConfig::default()).unwrap();
        let thread_id = ThreadId::from("abc");

        let older = watcher.reserve(&thread_id);
        let newer = watcher.reserve(&thread_id);

        let late = watcher.install(&thread_id, first.path()).unwrap();
        let late_token = late.cancel.clone();
        watcher.commit(&thread_id, older, Ok(late));
        assert!(late_token.is_cancelled());
        assert!(!watcher.is_watching("abc"));

        let current = watcher.install(&thread_id, second.path()).unwrap();
        watcher.commit(&thread_id, newer, Ok(current));
        assert_eq!(
            watcher.workspace_path("abc").as_deref(),
            Some(second.path())
        );
    }

    #[tokio::test]
    async fn test_stop_during_install_wins() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = WorkspaceWatcher::new(quiet_sink(), WatchConfig::default()).unwrap();
        let thread_id = ThreadId::from("abc");

        let reservation = watcher.reserve(&thread_id);
        let handle = watcher.install(&thread_id, temp_dir.path()).unwrap();
        let token = handle.cancel.clone();

        watcher.stop_watching("abc");
        watcher.commit(&thread_id, reservation, Ok(handle));

        assert!(!watcher.is_watching("abc"));
        assert!(token.is_cancelled());
        assert!(watcher.watches.lock().is_empty());
    }
}
