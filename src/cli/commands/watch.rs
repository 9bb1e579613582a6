//! Watch command - stream change notifications as JSON lines.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::cli::ThreadBinding;
use crate::config::Settings;
use crate::notifications::{FILES_CHANGED_EVENT, NotificationBroadcaster, WorkspaceChange};
use crate::watcher::{EventFilter, WorkspaceWatcher};
use crate::workspace::list_entries;

/// Arguments for the watch command.
pub struct WatchArgs {
    pub bindings: Vec<ThreadBinding>,
    pub debounce_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub list: bool,
}

/// Run until Ctrl-C, printing each notification on stdout.
pub async fn run(args: WatchArgs, settings: &Settings) -> Result<()> {
    let mut config = settings.watch.clone();
    if let Some(ms) = args.debounce_ms {
        config.debounce_ms = ms;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }

    let broadcaster = Arc::new(NotificationBroadcaster::new(config.channel_capacity));
    let mut receiver = broadcaster.subscribe();
    let filter = EventFilter::from_config(&config);
    let watcher = WorkspaceWatcher::new(broadcaster, config)?;

    for binding in &args.bindings {
        watcher.start_watching(binding.thread_id.clone(), &binding.path);
        if !watcher.is_watching(binding.thread_id.as_str()) {
            eprintln!(
                "Not watching {} for thread {}: not an accessible directory",
                binding.path.display(),
                binding.thread_id
            );
        }
    }

    let watched = watcher.watched_threads();
    if watched.is_empty() {
        bail!("No valid workspaces to watch");
    }
    eprintln!(
        "Watching {} workspace(s). Press Ctrl-C to stop.",
        watched.len()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            received = receiver.recv() => match received {
                Ok(change) => {
                    let entries = if args.list {
                        count_entries(change.workspace_path.clone(), filter.clone()).await
                    } else {
                        None
                    };
                    let line = render_change(&change, entries)?;
                    let mut stdout = std::io::stdout().lock();
                    writeln!(stdout, "{line}")?;
                    stdout.flush()?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("[watch] lagged by {n} notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    watcher.stop_all_watching();
    eprintln!("Stopped watching.");
    Ok(())
}

/// Count workspace entries off the async runtime.
async fn count_entries(root: PathBuf, filter: EventFilter) -> Option<usize> {
    let listing = tokio::task::spawn_blocking(move || list_entries(&root, &filter)).await;
    match listing {
        Ok(Ok(entries)) => Some(entries.len()),
        Ok(Err(e)) => {
            tracing::warn!("[watch] listing failed: {e}");
            None
        }
        Err(e) => {
            tracing::warn!("[watch] listing task failed: {e}");
            None
        }
    }
}

/// Wire shape of one printed notification.
#[derive(Serialize)]
struct ChangeLine<'a> {
    event: &'static str,
    #[serde(flatten)]
    change: &'a WorkspaceChange,
    #[serde(skip_serializing_if = "Option::is_none")]
    entries: Option<usize>,
}

/// One JSON line per notification:
/// `{"event":"workspace:files-changed","threadId":..,"workspacePath":..}`.
pub fn render_change(
    change: &WorkspaceChange,
    entries: Option<usize>,
) -> serde_json::Result<String> {
    serde_json::to_string(&ChangeLine {
        event: FILES_CHANGED_EVENT,
        change,
        entries,
    })
}
