//! Recursive filesystem watching for integrity monitoring.
//!
//! A [`FileWatcher`] owns the platform event source and emits one
//! [`RawEvent`] per affected path on a bounded channel. Stacking a
//! [`Debouncer`] on top (or using [`DebouncedWatcher`], which wires the
//! two together) coalesces raw event bursts into a single [`Event`] per
//! path once that path has been quiet for [`QUIESCENT_PERIOD`].

// linux -> hand-rolled fanotify, one filesystem-wide mark per root
// macos -> custom FSEvents impl, one stream per root
// windows -> notify's ReadDirectoryChangesW wrapper, recursive per root
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::{sync::mpsc, time::Instant};

pub mod debouncer;
#[cfg(target_os = "linux")]
mod fanotify;
#[cfg(target_os = "macos")]
mod fsevent;
mod watches;
#[cfg(target_os = "windows")]
mod windows;

pub use debouncer::{Debouncer, Event, QUIESCENT_PERIOD, TICK_INTERVAL};

#[cfg(target_os = "linux")]
pub(crate) use fanotify as platform;
#[cfg(target_os = "macos")]
pub(crate) use fsevent as platform;
#[cfg(target_os = "windows")]
pub(crate) use windows as platform;

#[cfg(target_os = "linux")]
type Backend = fanotify::FanotifyWatcher;
#[cfg(target_os = "macos")]
type Backend = fsevent::FsEventWatcher;
#[cfg(target_os = "windows")]
type Backend = windows::DirChangeWatcher;

/// Capacity of the bounded event channels. A stalled consumer blocks
/// the producer; events are never dropped.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Logical classification of a raw platform mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Delete,
    Change,
    /// A mask that matched no recognized kind. Never leaves the
    /// debouncer; pending entries treat it as a timestamp refresh.
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::Delete => "DELETE",
            EventKind::Change => "CHANGE",
            EventKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single undebounced filesystem event as reported by the platform.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Absolute path with trailing separators stripped; symlinks are
    /// not resolved.
    pub path: PathBuf,
    /// Platform-specific event bitfield. Kept raw rather than
    /// eagerly classified so the debouncer can rewrite it when
    /// collapsing event sequences.
    pub mask: u64,
    pub created_at: Instant,
    pub last_modified_at: Instant,
}

impl RawEvent {
    pub(crate) fn now(path: PathBuf, mask: u64) -> Self {
        let at = Instant::now();
        Self {
            path,
            mask,
            created_at: at,
            last_modified_at: at,
        }
    }

    /// Classify the mask under the current platform's bit layout.
    pub fn kind(&self) -> EventKind {
        platform::classify(self.mask)
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to initialize filesystem watching: {0}")]
    Backend(#[source] std::io::Error),
    #[cfg(target_os = "windows")]
    #[error("filewatching backend error: {0}")]
    Notify(#[from] notify::Error),
}

#[derive(Debug, Error)]
pub enum AddWatchError {
    #[error("path is already watched: {}", .0.display())]
    AlreadyWatched(PathBuf),
    #[error("failed to resolve watch root {}: {}", .0.display(), .1)]
    Resolve(PathBuf, #[source] std::io::Error),
    #[error("failed to register watch for {}: {}", .0.display(), .1)]
    Register(PathBuf, #[source] std::io::Error),
    #[cfg(target_os = "windows")]
    #[error("filewatching backend error: {0}")]
    Notify(#[from] notify::Error),
}

/// Uniform handle over the per-platform event source.
///
/// Backend selection is a compile-time choice; all three backends share
/// the `{new, add_recursive_watch, close}` surface and feed the same
/// bounded channel.
pub struct FileWatcher {
    backend: Backend,
    events: Option<mpsc::Receiver<RawEvent>>,
}

impl FileWatcher {
    /// Acquire the kernel facility and allocate the raw event channel.
    pub fn new() -> Result<Self, InitError> {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            backend: Backend::new(sender)?,
            events: Some(receiver),
        })
    }

    /// Watch the full subtree below `root`, including paths created
    /// after the watch starts. Re-registering an already-watched root
    /// fails with [`AddWatchError::AlreadyWatched`].
    pub fn add_recursive_watch(&mut self, root: impl AsRef<Path>) -> Result<(), AddWatchError> {
        self.backend.add_recursive_watch(root.as_ref())
    }

    /// Take the receiving half of the raw event channel. Yields
    /// `Some` exactly once.
    pub fn events(&mut self) -> Option<mpsc::Receiver<RawEvent>> {
        self.events.take()
    }

    /// Tear down all subscriptions. Idempotent and safe to call while
    /// a consumer is still draining the channel.
    pub fn close(&mut self) {
        self.backend.close();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// A [`FileWatcher`] with a [`Debouncer`] stacked on top, matching the
/// watcher's own `{new, add_recursive_watch, events, close}` surface.
pub struct DebouncedWatcher {
    watcher: FileWatcher,
    debouncer: Debouncer,
}

impl DebouncedWatcher {
    pub fn new() -> Result<Self, InitError> {
        let mut watcher = FileWatcher::new()?;
        let raw = watcher
            .events()
            .expect("a fresh watcher still holds its event channel");
        Ok(Self {
            watcher,
            debouncer: Debouncer::new(raw),
        })
    }

    pub fn add_recursive_watch(&mut self, root: impl AsRef<Path>) -> Result<(), AddWatchError> {
        self.watcher.add_recursive_watch(root)
    }

    /// Take the receiving half of the coalesced event channel. Yields
    /// `Some` exactly once.
    pub fn events(&mut self) -> Option<mpsc::Receiver<Event>> {
        self.debouncer.events()
    }

    pub fn close(&mut self) {
        self.debouncer.close();
        self.watcher.close();
    }
}
