//! Wildcard pattern tailer.
//!
//! Tails whichever file matching a glob pattern was modified most recently,
//! hot-switching to newer matches as they appear while presenting one
//! continuous logical stream to the hub. The directory watch is shared with
//! any other tailer watching the same directory.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

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

/// Window in which repeated creation events for the same path are treated as
/// duplicates. Filesystems can fire creation plus several modify events for
/// one write.
const CREATION_DEBOUNCE: Duration = Duration::from_secs(1);

/// Delay between noticing a new file and reading it, so the writer has a
/// moment to finish creating it.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Tails the most recently modified file matching a glob pattern.
pub struct PatternTailer {
    key: String,
    pattern: String,
    dir: PathBuf,
    file_glob: glob::Pattern,
    hub: Arc<IngestHub>,
    watches: Arc<WatchRegistry>,
    config: TailConfig,
    paused: Arc<AtomicBool>,
    worker: Option<WorkerHandle>,
}

impl PatternTailer {
    /// Create a tailer for `pattern`, publishing under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::InvalidSource`] when the pattern contains no
    /// wildcard characters, its parent directory does not exist, or the
    /// file-name component is not a valid glob.
    pub fn new(
        key: impl Into<String>,
        pattern: impl Into<String>,
        hub: Arc<IngestHub>,
        watches: Arc<WatchRegistry>,
        config: TailConfig,
    ) -> Result<Self, TailError> {
        let pattern = pattern.into();
        if !pattern.contains(['*', '?']) {
            return Err(TailError::InvalidSource(format!(
                "pattern has no wildcards: {pattern}"
            )));
        }

        let pattern_path = Path::new(&pattern);
        let file_name = pattern_path
            .file_name()
            .ok_or_else(|| {
                TailError::InvalidSource(format!("pattern has no file name: {pattern}"))
            })?
            .to_string_lossy()
            .into_owned();

        let parent = match pattern_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let dir = parent.canonicalize().map_err(|_| {
            TailError::InvalidSource(format!(
                "parent directory does not exist: {}",
                parent.display()
            ))
        })?;

        let file_glob = glob::Pattern::new(&file_name).map_err(|e| {
            TailError::InvalidSource(format!("invalid pattern {file_name}: {e}"))
        })?;

        let pattern = dir.join(&file_name).to_string_lossy().into_owned();

        Ok(Self {
            key: key.into(),
            pattern,
            dir,
            file_glob,
            hub,
            watches,
            config,
            paused: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Start tailing. Idempotent.
    ///
    /// If matching files exist, the most recently modified one is loaded
    /// silently: the initial selection publishes no interruption or
    /// resumption event.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::Notify`] if the directory watch cannot be armed,
    /// or [`TailError::AccessDenied`] if the initial file cannot be read.
    pub async fn start(&mut self) -> Result<(), TailError> {
        if self.is_running() {
            return Ok(());
        }

        let watch = self.watches.acquire(&self.dir)?;
        let mut seen = HashSet::new();
        let mut current = None;

        if let Some(initial) = latest_match(&self.pattern) {
            match ContentReader::open(&initial, self.config.mode, self.config.tail_line_limit)
                .await
            {
                Ok((reader, content)) => {
                    tracing::info!(
                        key = %self.key,
                        path = %initial.display(),
                        "Initial file loaded"
                    );
                    if !content.is_empty() {
                        self.hub.publish(&self.key, &content);
                    }
                    seen.insert(initial);
                    current = Some(reader);
                }
                // Vanished between the glob walk and the open.
                Err(TailError::FileDeleted(_)) => {}
                Err(e) => return Err(e),
            }
        } else {
            tracing::info!(key = %self.key, pattern = %self.pattern, "No matching files yet");
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = PatternWorker {
            key: self.key.clone(),
            pattern: self.pattern.clone(),
            file_glob: self.file_glob.clone(),
            hub: Arc::clone(&self.hub),
            config: self.config.clone(),
            current,
            seen,
            recent_events: HashMap::new(),
            paused: self.paused.load(Ordering::SeqCst),
            pending: Vec::new(),
            ticks: 0,
        };
        let task = tokio::spawn(worker.run(watch, cancel.clone(), cmd_rx));
        self.worker = Some(WorkerHandle {
            cancel,
            commands: cmd_tx,
            task,
        });
        Ok(())
    }

    /// Stop the worker cooperatively, releasing this tailer's reference on
    /// the shared directory watch.
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

    /// Resolved pattern being tailed.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

struct PatternWorker {
    key: String,
    pattern: String,
    file_glob: glob::Pattern,
    hub: Arc<IngestHub>,
    config: TailConfig,
    current: Option<ContentReader>,
    /// Candidate paths already notified, to suppress duplicate creation
    /// events.
    seen: HashSet<PathBuf>,
    /// Last creation-event time per path, for the debounce window.
    recent_events: HashMap<PathBuf, Instant>,
    paused: bool,
    pending: Vec<String>,
    ticks: u32,
}

impl PatternWorker {
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
        }
        tracing::debug!(key = %self.key, "Pattern tailer worker exiting");
    }

    async fn on_tick(&mut self) {
        self.ticks += 1;
        let reconcile_due = self.ticks >= self.config.reconcile_ticks;
        if reconcile_due {
            self.ticks = 0;
        }

        self.read_forward().await;

        if reconcile_due {
            self.reconcile().await;
        }
    }

    async fn on_fs_event(&mut self, event: &FsEvent) {
        match event.kind {
            FsEventKind::Created => {
                for path in &event.paths {
                    self.on_candidate_created(path.clone()).await;
                }
            }
            FsEventKind::Modified => {
                if self.is_current(&event.paths) {
                    self.read_forward().await;
                }
            }
            // Events can be stale by the time they arrive; the fingerprint
            // comparison decides whether the current file is really gone.
            FsEventKind::Removed => {
                if self.is_current(&event.paths) {
                    self.reconcile().await;
                }
            }
        }
    }

    fn is_current(&self, paths: &[PathBuf]) -> bool {
        self.current
            .as_ref()
            .is_some_and(|reader| paths.iter().any(|p| p == reader.path()))
    }

    /// A file appeared in the watched directory. Hot-switch to it when it
    /// matches the pattern, survives the debounce window, and is newer than
    /// the current file (or there is no usable current file).
    async fn on_candidate_created(&mut self, path: PathBuf) {
        let matches = path
            .file_name()
            .is_some_and(|name| self.file_glob.matches(&name.to_string_lossy()));
        if !matches {
            return;
        }

        let now = Instant::now();
        if let Some(last) = self.recent_events.get(&path) {
            if now.duration_since(*last) < CREATION_DEBOUNCE {
                tracing::debug!(path = %path.display(), "Ignoring duplicate creation event");
                return;
            }
        }
        self.recent_events.insert(path.clone(), now);

        if self.seen.contains(&path) {
            tracing::debug!(path = %path.display(), "File already tracked, ignoring");
            return;
        }
        tracing::info!(key = %self.key, path = %path.display(), "New matching file detected");
        self.seen.insert(path.clone());

        // Let the writer finish creating the file before reading it.
        tokio::time::sleep(SETTLE_DELAY).await;

        let Some(new_fp) = Fingerprint::capture(&path).await else {
            tracing::warn!(path = %path.display(), "New file vanished before it could be read");
            return;
        };

        let switch = match &self.current {
            None => true,
            Some(reader) => match Fingerprint::capture(reader.path()).await {
                // Current file is gone or unreadable: take the newcomer.
                None => true,
                Some(current_fp) => new_fp.modified_at > current_fp.modified_at,
            },
        };

        if switch {
            self.switch_to(path).await;
        } else {
            tracing::debug!(path = %path.display(), "Ignoring older file");
        }
    }

    /// Fallback detection on the reconcile cadence: the current file may
    /// have been deleted, truncated, or replaced without an event, a match
    /// may exist while nothing is selected, or a newer match may have
    /// appeared without a creation event.
    async fn reconcile(&mut self) {
        let (path, last) = match &self.current {
            Some(reader) => (reader.path().to_path_buf(), reader.fingerprint()),
            None => {
                if let Some(latest) = latest_match(&self.pattern) {
                    self.switch_to(latest).await;
                }
                return;
            }
        };

        match Fingerprint::capture(&path).await {
            None => self.on_current_gone().await,
            Some(current_fp) => {
                if last.replaced_by(&current_fp) {
                    self.reload_current("file replaced").await;
                } else if last.truncated_by(&current_fp) {
                    self.handle_truncation().await;
                } else if last.outgrown_by(&current_fp) {
                    self.read_forward().await;
                    if let Some(reader) = &mut self.current {
                        reader.record_fingerprint(current_fp);
                    }
                }
                self.switch_if_newer(current_fp.modified_at).await;
            }
        }
    }

    /// The contract is to tail the most recently modified match; honor it
    /// even when the creation event for a newer file was dropped.
    async fn switch_if_newer(&mut self, current_modified: SystemTime) {
        let Some(latest) = latest_match(&self.pattern) else {
            return;
        };
        if self
            .current
            .as_ref()
            .is_none_or(|reader| reader.path() == latest)
        {
            return;
        }
        if let Some(latest_fp) = Fingerprint::capture(&latest).await {
            if latest_fp.modified_at > current_modified {
                self.switch_to(latest).await;
            }
        }
    }

    /// The current file is gone: interrupt and fall back to the newest
    /// remaining match, if any. Idempotent once the current file is cleared.
    async fn on_current_gone(&mut self) {
        let Some(reader) = self.current.take() else {
            return;
        };
        let name = display_name(reader.path());
        tracing::warn!(key = %self.key, path = %reader.path().display(), "Current file deleted");
        self.hub.interrupted(&self.key, &format!("file deleted: {name}"));

        if let Some(latest) = latest_match(&self.pattern) {
            self.switch_to(latest).await;
        }
    }

    /// Transfer the stream to `new_path`, publishing an interruption when a
    /// current file is displaced and a resumption once the new file is
    /// loaded. The silent initial selection happens in
    /// `PatternTailer::start` instead.
    async fn switch_to(&mut self, new_path: PathBuf) {
        if self
            .current
            .as_ref()
            .is_some_and(|reader| reader.path() == new_path)
        {
            return;
        }

        let old = self.current.take();
        if let Some(old) = &old {
            self.hub.interrupted(
                &self.key,
                &format!(
                    "switching from {} to {}",
                    display_name(old.path()),
                    display_name(&new_path)
                ),
            );
        }

        match ContentReader::open(&new_path, self.config.mode, self.config.tail_line_limit).await
        {
            Ok((reader, content)) => {
                tracing::info!(key = %self.key, path = %new_path.display(), "Switching to file");
                if !content.is_empty() {
                    self.emit(content);
                }
                self.seen.insert(new_path);
                self.current = Some(reader);
                self.hub.resumed(&self.key);
            }
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    path = %new_path.display(),
                    error = %e,
                    "Failed to switch to file"
                );
            }
        }
    }

    async fn read_forward(&mut self) {
        let result = match &mut self.current {
            Some(reader) => reader.read_new().await,
            None => return,
        };
        match result {
            Ok(content) => {
                if !content.is_empty() {
                    self.emit(content);
                }
            }
            Err(TailError::Truncated) => self.handle_truncation().await,
            Err(TailError::Replaced) => self.reload_current("file replaced").await,
            Err(TailError::FileDeleted(_)) => self.on_current_gone().await,
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    "Transient read failure, retrying next tick"
                );
            }
        }
    }

    /// Same truncation recovery as the single-file tailer, applied to
    /// whichever file is current.
    async fn handle_truncation(&mut self) {
        if self.current.is_none() {
            return;
        }
        tracing::info!(key = %self.key, "Current file truncated, re-reading from start");
        self.hub.interrupted(&self.key, "file truncated");
        if let Some(reader) = &mut self.current {
            reader.reset();
        }
        self.hub.resumed(&self.key);
        self.emit(RELOAD_SEPARATOR.to_string());

        let result = match &mut self.current {
            Some(reader) => reader.read_new().await,
            None => return,
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

        if let Some(reader) = &mut self.current {
            if let Some(fingerprint) = Fingerprint::capture(reader.path()).await {
                reader.record_fingerprint(fingerprint);
            }
        }
    }

    /// The current path now names a different file: clear the stale buffer
    /// and reload it.
    async fn reload_current(&mut self, reason: &str) {
        let Some(reader) = self.current.take() else {
            return;
        };
        let path = reader.path().to_path_buf();
        tracing::info!(key = %self.key, path = %path.display(), reason, "Reloading file");
        self.hub.interrupted(&self.key, reason);
        self.hub.clear(&self.key);

        match ContentReader::open(&path, self.config.mode, self.config.tail_line_limit).await {
            Ok((reader, content)) => {
                if !content.is_empty() {
                    self.emit(content);
                }
                self.current = Some(reader);
                self.emit(RELOAD_SEPARATOR.to_string());
                self.hub.resumed(&self.key);
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Error reloading file");
            }
        }
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
}

/// Most recently modified file matching `pattern`, if any.
pub(crate) fn latest_match(pattern: &str) -> Option<PathBuf> {
    let entries = glob::glob(pattern).ok()?;
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for path in entries.flatten() {
        let Ok(metadata) = path.metadata() else {
            continue;
        };
        let modified = metadata
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if latest
            .as_ref()
            .is_none_or(|(newest, _)| modified > *newest)
        {
            latest = Some((modified, path));
        }
    }
    latest.map(|(_, path)| path)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
