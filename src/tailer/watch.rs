//! Shared directory watching.
//!
//! Multiple tailers may watch the same directory. A [`WatchRegistry`] keeps
//! one debounced OS watcher per directory, reference counted, and fans its
//! events out to every holder over a broadcast channel. The registry is an
//! injected service constructed once at process start, never module-level
//! state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use notify_debouncer_full::{
    new_debouncer,
    notify::{self, RecursiveMode},
    DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache,
};
use tokio::sync::broadcast;

use super::error::TailError;

/// Debounce window for coalescing raw OS events.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Broadcast capacity per watched directory. Overflow is reported as lag and
/// recovered by the tailers' reconciliation ticks.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Simplified filesystem event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// A path was created (including rename-to).
    Created,
    /// A path's content changed.
    Modified,
    /// A path was removed or renamed away.
    Removed,
}

/// A debounced filesystem event delivered to watch holders.
#[derive(Debug, Clone)]
pub struct FsEvent {
    /// What happened.
    pub kind: FsEventKind,
    /// Affected paths.
    pub paths: Vec<PathBuf>,
}

struct WatchEntry {
    /// Keeps the OS watch alive; dropped when the last reference releases.
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
    sender: broadcast::Sender<FsEvent>,
    refs: usize,
}

/// Reference-counted registry of per-directory watchers.
#[derive(Default)]
pub struct WatchRegistry {
    entries: Mutex<HashMap<PathBuf, WatchEntry>>,
}

impl WatchRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a watch on `dir`, creating the OS watcher only if this is the
    /// first reference.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::Notify`] if the OS watcher cannot be created or
    /// the directory cannot be watched.
    pub fn acquire(self: &Arc<Self>, dir: &Path) -> Result<DirWatch, TailError> {
        let mut entries = lock(&self.entries);

        if let Some(entry) = entries.get_mut(dir) {
            entry.refs += 1;
            tracing::debug!(
                dir = %dir.display(),
                refs = entry.refs,
                "Reusing directory watch"
            );
            return Ok(DirWatch {
                registry: Arc::clone(self),
                dir: dir.to_path_buf(),
                receiver: entry.sender.subscribe(),
            });
        }

        let (sender, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let event_tx = sender.clone();
        let watch_dir = dir.to_path_buf();

        let mut debouncer = new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in &events {
                        forward_event(event, &event_tx);
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!(
                            dir = %watch_dir.display(),
                            error = %error,
                            "Filesystem watcher error"
                        );
                    }
                }
            },
        )?;

        debouncer.watch(dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(dir = %dir.display(), "Created directory watch");

        entries.insert(
            dir.to_path_buf(),
            WatchEntry {
                _debouncer: debouncer,
                sender,
                refs: 1,
            },
        );

        Ok(DirWatch {
            registry: Arc::clone(self),
            dir: dir.to_path_buf(),
            receiver,
        })
    }

    /// Number of directories currently watched.
    #[must_use]
    pub fn active_watches(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Reference count for `dir`, 0 if unwatched.
    #[must_use]
    pub fn ref_count(&self, dir: &Path) -> usize {
        lock(&self.entries).get(dir).map_or(0, |e| e.refs)
    }

    fn release(&self, dir: &Path) {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(dir) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(dir);
                tracing::debug!(dir = %dir.display(), "Released directory watch");
            } else {
                tracing::debug!(
                    dir = %dir.display(),
                    refs = entry.refs,
                    "Decremented directory watch refs"
                );
            }
        }
    }
}

/// An owned reference to a shared directory watch.
///
/// Dropping the handle releases the reference; the OS watch is torn down when
/// the last handle for its directory goes away.
pub struct DirWatch {
    registry: Arc<WatchRegistry>,
    dir: PathBuf,
    receiver: broadcast::Receiver<FsEvent>,
}

impl DirWatch {
    /// Wait for the next filesystem event on this directory.
    ///
    /// Lagged (dropped) events are logged and skipped; the tailers'
    /// reconciliation ticks recover anything missed.
    pub async fn next_event(&mut self) -> FsEvent {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        dir = %self.dir.display(),
                        skipped,
                        "Dropped filesystem events"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // The sender lives in the registry entry we hold a
                    // reference on, so this cannot happen while the handle is
                    // alive; park rather than spin.
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    /// Directory this handle watches.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for DirWatch {
    fn drop(&mut self) {
        self.registry.release(&self.dir);
    }
}

fn forward_event(event: &DebouncedEvent, sender: &broadcast::Sender<FsEvent>) {
    use notify::event::{EventKind, ModifyKind, RenameMode};

    let kind = match event.kind {
        EventKind::Create(_) => FsEventKind::Created,
        EventKind::Remove(_) => FsEventKind::Removed,
        // Rename-away is a removal at the watched path; rename-into is a
        // creation.
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FsEventKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let Some(from) = event.paths.first() {
                let _ = sender.send(FsEvent {
                    kind: FsEventKind::Removed,
                    paths: vec![from.clone()],
                });
            }
            if let Some(to) = event.paths.get(1) {
                let _ = sender.send(FsEvent {
                    kind: FsEventKind::Created,
                    paths: vec![to.clone()],
                });
            }
            return;
        }
        EventKind::Modify(_) => FsEventKind::Modified,
        _ => return,
    };

    let _ = sender.send(FsEvent {
        kind,
        paths: event.paths.clone(),
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_and_release_single_watch() {
        let registry = Arc::new(WatchRegistry::new());
        let dir = TempDir::new().unwrap();

        let watch = match registry.acquire(dir.path()) {
            Ok(w) => w,
            Err(TailError::Notify(e)) => {
                // Skip if the system is out of watch descriptors.
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };

        assert_eq!(registry.active_watches(), 1);
        assert_eq!(registry.ref_count(dir.path()), 1);

        drop(watch);
        assert_eq!(registry.active_watches(), 0);
        assert_eq!(registry.ref_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_shared_watch_refcounting() {
        let registry = Arc::new(WatchRegistry::new());
        let dir = TempDir::new().unwrap();

        let first = match registry.acquire(dir.path()) {
            Ok(w) => w,
            Err(TailError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };
        let second = registry.acquire(dir.path()).unwrap();

        // One OS watch, two references.
        assert_eq!(registry.active_watches(), 1);
        assert_eq!(registry.ref_count(dir.path()), 2);

        drop(first);
        assert_eq!(registry.active_watches(), 1);
        assert_eq!(registry.ref_count(dir.path()), 1);

        drop(second);
        assert_eq!(registry.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_watch_delivers_creation_events() {
        let registry = Arc::new(WatchRegistry::new());
        let dir = TempDir::new().unwrap();

        let mut watch = match registry.acquire(dir.path()) {
            Ok(w) => w,
            Err(TailError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };

        // Give the watcher time to arm before mutating the directory.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let file_path = dir.path().join("new.log");
        std::fs::write(&file_path, "hello\n").unwrap();

        let event =
            tokio::time::timeout(Duration::from_secs(2), async { watch.next_event().await }).await;

        // Tolerate a timeout on slow systems; the event path is exercised
        // further in the integration tests.
        if let Ok(event) = event {
            assert!(event.paths.iter().any(|p| p.ends_with("new.log")));
        }
    }
}
