//! Single-file tailer.
//!
//! Owns one path and manages the three-state watch lifecycle: waiting for the
//! file to appear, tailing it, and recovering when it is deleted, truncated,
//! or replaced. Content increments are published to the ingestion hub; change
//! detection combines filesystem notifications with a periodic fingerprint
//! reconciliation that works even when the OS drops events.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::hub::IngestHub;

use super::config::TailConfig;
use super::error::TailError;
use super::fingerprint::Fingerprint;
use super::reader::ContentReader;
use super::watch::{DirWatch, FsEvent, FsEventKind, WatchRegistry};
use super::worker::{TailCommand, WorkerHandle};
use super::RELOAD_SEPARATOR;

/// Watch lifecycle of the tailed path.
#[derive(Debug)]
enum TailState {
    /// File does not exist; waiting for a creation event in the parent
    /// directory.
    AwaitingCreation,
    /// File is open and being followed.
    Tailing(ContentReader),
    /// Stream was just interrupted; re-arms to `AwaitingCreation` on the
    /// next tick.
    Interrupted,
}

/// Tails a single file and publishes appended content to the hub.
///
/// The worker runs as one background task; all state mutation happens inside
/// it, serialized by the task itself.
pub struct FileTailer {
    key: String,
    path: PathBuf,
    hub: Arc<IngestHub>,
    watches: Arc<WatchRegistry>,
    config: TailConfig,
    paused: Arc<AtomicBool>,
    worker: Option<WorkerHandle>,
}

impl FileTailer {
    /// Create a tailer for `path`, publishing under `key`.
    ///
    /// The path's parent directory is resolved eagerly; the file itself may
    /// not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::InvalidSource`] if the parent directory does not
    /// exist or the path has no file name.
    pub fn new(
        key: impl Into<String>,
        path: impl AsRef<Path>,
        hub: Arc<IngestHub>,
        watches: Arc<WatchRegistry>,
        config: TailConfig,
    ) -> Result<Self, TailError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .ok_or_else(|| TailError::InvalidSource(format!("path has no file name: {}", path.display())))?
            .to_os_string();

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let parent = parent.canonicalize().map_err(|_| {
            TailError::InvalidSource(format!(
                "parent directory does not exist: {}",
                parent.display()
            ))
        })?;

        Ok(Self {
            key: key.into(),
            path: parent.join(file_name),
            hub,
            watches,
            config,
            paused: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Start tailing. Idempotent: a second call on a running tailer is a
    /// no-op.
    ///
    /// If the file exists, its initial content is read according to the
    /// configured mode and published before the worker starts following
    /// appends. If it does not exist, the worker waits for creation.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::AccessDenied`] if the file cannot be read,
    /// [`TailError::Notify`] if the directory watch cannot be armed, or
    /// [`TailError::Io`] on other I/O failures. None of these are retried.
    pub async fn start(&mut self) -> Result<(), TailError> {
        if self.is_running() {
            return Ok(());
        }

        let parent = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let watch = self.watches.acquire(&parent)?;

        let state = if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            match ContentReader::open(&self.path, self.config.mode, self.config.tail_line_limit)
                .await
            {
                Ok((reader, initial)) => {
                    tracing::info!(
                        key = %self.key,
                        path = %self.path.display(),
                        "File exists, starting tail"
                    );
                    if !initial.is_empty() {
                        self.hub.publish(&self.key, &initial);
                    }
                    TailState::Tailing(reader)
                }
                // Deleted between the existence probe and the open: wait for
                // it to come back.
                Err(TailError::FileDeleted(_)) => TailState::AwaitingCreation,
                Err(e) => return Err(e),
            }
        } else {
            tracing::info!(
                key = %self.key,
                path = %self.path.display(),
                "File does not exist, watching for creation"
            );
            TailState::AwaitingCreation
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = FileWorker {
            key: self.key.clone(),
            path: self.path.clone(),
            hub: Arc::clone(&self.hub),
            config: self.config.clone(),
            state,
            paused: self.paused.load(Ordering::SeqCst),
            pending: Vec::new(),
            ticks: 0,
            halted: false,
        };
        let task = tokio::spawn(worker.run(watch, cancel.clone(), cmd_rx));
        self.worker = Some(WorkerHandle {
            cancel,
            commands: cmd_tx,
            task,
        });
        Ok(())
    }

    /// Stop the worker cooperatively, waiting at most the configured stop
    /// timeout.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop(self.config.stop_timeout, &self.key).await;
        }
    }

    /// Suppress downstream emission while continuing to read and buffer new
    /// content.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        if let Some(worker) = &self.worker {
            let _ = worker.commands.send(TailCommand::Pause);
        }
    }

    /// Resume emission, flushing everything buffered while paused as a
    /// single increment.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        if let Some(worker) = &self.worker {
            let _ = worker.commands.send(TailCommand::Resume);
        }
    }

    /// Whether the worker task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(WorkerHandle::is_running)
    }

    /// Whether emission is currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Path-key this tailer publishes under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Resolved path being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct FileWorker {
    key: String,
    path: PathBuf,
    hub: Arc<IngestHub>,
    config: TailConfig,
    state: TailState,
    paused: bool,
    /// Content read while paused, flushed as one increment on resume.
    pending: Vec<String>,
    ticks: u32,
    halted: bool,
}

impl FileWorker {
    async fn run(
        mut self,
        mut watch: DirWatch,
        cancel: CancellationToken,
        mut commands: mpsc::UnboundedReceiver<TailCommand>,
    ) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.on_tick().await,
                event = watch.next_event() => self.on_fs_event(&event).await,
                cmd = commands.recv() => match cmd {
                    Some(TailCommand::Pause) => self.paused = true,
                    Some(TailCommand::Resume) => self.on_resume(),
                    None => break,
                },
            }
            if self.halted {
                break;
            }
        }
        tracing::debug!(key = %self.key, "File tailer worker exiting");
    }

    async fn on_tick(&mut self) {
        self.ticks += 1;
        let reconcile_due = self.ticks >= self.config.reconcile_ticks;
        if reconcile_due {
            self.ticks = 0;
        }

        if matches!(self.state, TailState::Interrupted) {
            self.state = TailState::AwaitingCreation;
            return;
        }
        if matches!(self.state, TailState::AwaitingCreation) {
            // Fallback creation probe for platforms that drop events.
            if reconcile_due && tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
                self.begin_tailing().await;
            }
            return;
        }
        if reconcile_due {
            self.reconcile().await;
        }
    }

    async fn on_fs_event(&mut self, event: &FsEvent) {
        if !event.paths.iter().any(|p| p == &self.path) {
            return;
        }
        match event.kind {
            FsEventKind::Created => {
                if matches!(self.state, TailState::Tailing(_)) {
                    // A creation event for a path we are already tailing means
                    // the file was likely replaced behind our back; the
                    // fingerprint comparison sorts out what actually happened.
                    self.reconcile().await;
                } else {
                    self.begin_tailing().await;
                }
            }
            FsEventKind::Modified => self.read_forward().await,
            // Events can be stale by the time they arrive: a deleted file may
            // already have been recreated. Trust the filesystem, not the
            // event: the fingerprint comparison distinguishes deletion from
            // replacement.
            FsEventKind::Removed => self.reconcile().await,
        }
    }

    /// Authoritative fallback change detection: compares the current
    /// fingerprint against the last-known one, catching deletion,
    /// replacement, truncation, and appends whose events were dropped.
    async fn reconcile(&mut self) {
        let last = match &self.state {
            TailState::Tailing(reader) => reader.fingerprint(),
            _ => return,
        };

        match Fingerprint::capture(&self.path).await {
            None => self.on_deleted(),
            Some(current) => {
                if last.replaced_by(&current) {
                    self.reload_file("file replaced").await;
                } else if last.truncated_by(&current) {
                    self.handle_truncation().await;
                } else if last.outgrown_by(&current) {
                    self.read_forward().await;
                    if let TailState::Tailing(reader) = &mut self.state {
                        reader.record_fingerprint(current);
                    }
                }
            }
        }
    }

    /// The awaited file appeared: publish a resumption event and emit its
    /// initial content. The initial read at `start()` happens inline there
    /// instead and stays silent.
    async fn begin_tailing(&mut self) {
        match ContentReader::open(&self.path, self.config.mode, self.config.tail_line_limit).await
        {
            Ok((reader, initial)) => {
                tracing::info!(key = %self.key, path = %self.path.display(), "Tailing started");
                self.hub.resumed(&self.key);
                if !initial.is_empty() {
                    self.emit(initial);
                }
                self.state = TailState::Tailing(reader);
            }
            // Raced with another deletion: keep waiting.
            Err(TailError::FileDeleted(_)) => self.state = TailState::AwaitingCreation,
            Err(TailError::AccessDenied(path)) => self.halt_access_denied(&path),
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    "Failed to open file, retrying next tick"
                );
            }
        }
    }

    async fn read_forward(&mut self) {
        let result = match &mut self.state {
            TailState::Tailing(reader) => reader.read_new().await,
            _ => return,
        };
        match result {
            Ok(content) => {
                if !content.is_empty() {
                    self.emit(content);
                }
            }
            Err(TailError::Truncated) => self.handle_truncation().await,
            Err(TailError::Replaced) => self.reload_file("file replaced").await,
            Err(TailError::FileDeleted(_)) => self.on_deleted(),
            Err(TailError::AccessDenied(path)) => self.halt_access_denied(&path),
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    "Transient read failure, retrying next tick"
                );
            }
        }
    }

    /// The file shrank in place: re-read it from the start after an
    /// interruption/resumption pair and a visible separator.
    async fn handle_truncation(&mut self) {
        if !matches!(self.state, TailState::Tailing(_)) {
            return;
        }
        tracing::info!(
            key = %self.key,
            path = %self.path.display(),
            "File truncated, re-reading from start"
        );
        self.hub.interrupted(&self.key, "file truncated");
        if let TailState::Tailing(reader) = &mut self.state {
            reader.reset();
        }
        self.hub.resumed(&self.key);
        self.emit(RELOAD_SEPARATOR.to_string());

        let result = match &mut self.state {
            TailState::Tailing(reader) => reader.read_new().await,
            _ => return,
        };
        match result {
            Ok(content) => {
                if !content.is_empty() {
                    self.emit(content);
                }
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Error reading after truncation");
            }
        }

        if let Some(fingerprint) = Fingerprint::capture(&self.path).await {
            if let TailState::Tailing(reader) = &mut self.state {
                reader.record_fingerprint(fingerprint);
            }
        }
    }

    /// The path now names a different file: clear the stale downstream
    /// buffer and reload from scratch.
    async fn reload_file(&mut self, reason: &str) {
        tracing::info!(
            key = %self.key,
            path = %self.path.display(),
            reason,
            "Reloading file"
        );
        self.hub.interrupted(&self.key, reason);
        self.state = TailState::Interrupted;
        self.hub.clear(&self.key);

        match ContentReader::open(&self.path, self.config.mode, self.config.tail_line_limit).await
        {
            Ok((reader, content)) => {
                if !content.is_empty() {
                    self.emit(content);
                }
                self.state = TailState::Tailing(reader);
                self.emit(RELOAD_SEPARATOR.to_string());
                self.hub.resumed(&self.key);
            }
            // Replaced and then deleted before we could reopen; the
            // interruption is already published, creation re-arms next tick.
            Err(TailError::FileDeleted(_)) => {}
            Err(TailError::AccessDenied(path)) => self.halt_access_denied(&path),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Error reloading file");
            }
        }
    }

    /// Idempotent: a deletion reported by both an event and the reconcile
    /// tick is handled once.
    fn on_deleted(&mut self) {
        if !matches!(self.state, TailState::Tailing(_)) {
            return;
        }
        tracing::info!(key = %self.key, path = %self.path.display(), "File deleted");
        self.hub.interrupted(&self.key, "file deleted");
        self.state = TailState::Interrupted;
    }

    fn on_resume(&mut self) {
        self.paused = false;
        if self.pending.is_empty() {
            return;
        }
        let content = self.pending.concat();
        self.pending.clear();
        self.hub.publish(&self.key, &content);
    }

    fn emit(&mut self, content: String) {
        if self.paused {
            self.pending.push(content);
        } else {
            self.hub.publish(&self.key, &content);
        }
    }

    fn halt_access_denied(&mut self, path: &Path) {
        tracing::error!(
            key = %self.key,
            path = %path.display(),
            "Permission denied, stopping tailer"
        );
        self.hub.interrupted(&self.key, "permission denied");
        self.halted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deps() -> (Arc<IngestHub>, Arc<WatchRegistry>) {
        (Arc::new(IngestHub::new()), Arc::new(WatchRegistry::new()))
    }

    #[test]
    fn test_new_rejects_missing_parent() {
        let (hub, watches) = deps();
        let result = FileTailer::new(
            "key",
            "/nonexistent-dir-12345/app.log",
            hub,
            watches,
            TailConfig::default(),
        );
        assert!(matches!(result, Err(TailError::InvalidSource(_))));
    }

    #[test]
    fn test_new_resolves_path() {
        let (hub, watches) = deps();
        let dir = TempDir::new().unwrap();
        let tailer = FileTailer::new(
            "key",
            dir.path().join("app.log"),
            hub,
            watches,
            TailConfig::default(),
        )
        .unwrap();

        assert!(tailer.path().is_absolute());
        assert!(tailer.path().ends_with("app.log"));
        assert!(!tailer.is_running());
        assert!(!tailer.is_paused());
    }

    #[tokio::test]
    async fn test_start_publishes_initial_content_and_is_idempotent() {
        let (hub, watches) = deps();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first\nsecond\n").unwrap();

        hub.register("app.log", 100);
        let mut tailer = FileTailer::new(
            "app.log",
            &path,
            Arc::clone(&hub),
            watches,
            TailConfig::default(),
        )
        .unwrap();

        match tailer.start().await {
            Ok(()) => {}
            Err(TailError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        }
        assert!(tailer.is_running());
        assert_eq!(hub.buffer_content("app.log").unwrap(), "first\nsecond\n");

        // Second start must not re-publish.
        tailer.start().await.unwrap();
        assert_eq!(hub.buffer_content("app.log").unwrap(), "first\nsecond\n");

        tailer.stop().await;
        assert!(!tailer.is_running());
    }

    #[tokio::test]
    async fn test_start_tail_only_emits_last_lines() {
        let (hub, watches) = deps();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "l1\nl2\nl3\nl4\nl5\n").unwrap();

        hub.register("app.log", 100);
        let mut tailer = FileTailer::new(
            "app.log",
            &path,
            Arc::clone(&hub),
            watches,
            TailConfig::tail_only(2),
        )
        .unwrap();

        match tailer.start().await {
            Ok(()) => {}
            Err(TailError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        }
        assert_eq!(hub.buffer_content("app.log").unwrap(), "l4\nl5\n");

        tailer.stop().await;
    }
}
