//! Per-thread workspace watching.
//!
//! # Architecture
//!
//! ```text
//! WorkspaceWatcher (thread -> WatchHandle, behind one mutex)
//!   per watch:
//!     notify::RecommendedWatcher (recursive)
//!       -> mpsc -> forwarder task -> EventFilter -> Debouncer --+
//!     poll task (fixed interval) -------------------------------+--> NotificationSink
//! ```
//!
//! The debounce path gives responsiveness; the poll path bounds staleness
//! when native events stop arriving (network mounts, virtual filesystems).

mod debouncer;
mod error;
mod filter;
mod registry;

pub use debouncer::Debouncer;
pub use error::WatchError;
pub use filter::{EventFilter, WatchRoot};
pub use registry::{WorkspaceWatcher, WorkspaceWatcherBuilder};
