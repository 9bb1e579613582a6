//! Drops native events that originate in hidden or vendor directories.

use std::path::{Component, Path, PathBuf};

use notify::{Event, EventKind};

use crate::config::WatchConfig;

/// Component-based path filter applied before debouncing.
#[derive(Debug, Clone)]
pub struct EventFilter {
    skip_hidden: bool,
    ignored_dirs: Vec<String>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::from_config(&WatchConfig::default())
    }
}

/// Workspace root as configured plus, when it differs, its canonical form.
///
/// Some backends report canonicalised paths (FSEvents resolves `/var` to
/// `/private/var`), so events are matched against both.
#[derive(Debug, Clone)]
pub struct WatchRoot {
    path: PathBuf,
    canonical: Option<PathBuf>,
}

impl WatchRoot {
    /// Resolves the canonical form once; a root that cannot be resolved keeps only `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let canonical = path.canonicalize().ok().filter(|c| *c != path);
        Self { path, canonical }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `path` relative to the root, or unchanged when it lies outside it.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        if let Ok(relative) = path.strip_prefix(&self.path) {
            return relative;
        }
        self.canonical
            .as_deref()
            .and_then(|canonical| path.strip_prefix(canonical).ok())
            .unwrap_or(path)
    }
}

impl EventFilter {
    pub fn new(skip_hidden: bool, ignored_dirs: Vec<String>) -> Self {
        Self {
            skip_hidden,
            ignored_dirs,
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(config.skip_hidden, config.ignored_dirs.clone())
    }

    /// True if a single path component should be skipped.
    pub fn is_ignored_name(&self, name: &str) -> bool {
        (self.skip_hidden && name.starts_with('.')) || self.ignored_dirs.iter().any(|d| d == name)
    }

    /// True if any component of `relative` is ignored.
    pub fn is_ignored_path(&self, relative: &Path) -> bool {
        relative.components().any(|component| match component {
            Component::Normal(name) => self.is_ignored_name(&name.to_string_lossy()),
            _ => false,
        })
    }

    /// Decide whether a native event should reach the coalescer.
    ///
    /// Paths are judged relative to `root`. An event without paths is an
    /// unknown or batched change and always passes; an event with several
    /// paths passes if any of them does.
    pub fn accepts(&self, root: &WatchRoot, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }

        if event.paths.is_empty() {
            return true;
        }

        event
            .paths
            .iter()
            .any(|path| !self.is_ignored_path(root.relative(path)))
    }
}
