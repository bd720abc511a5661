//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use tailhub::hub::Subscriber;
use tailhub::tailer::TailConfig;

/// Tailer config with short intervals so tests converge quickly: 25 ms poll
/// ticks with reconciliation every 2 ticks.
pub fn fast_config() -> TailConfig {
    TailConfig {
        poll_interval: Duration::from_millis(25),
        reconcile_ticks: 2,
        ..TailConfig::default()
    }
}

/// Notification observed by a [`Recording`] subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Content(String),
    Cleared,
    Interrupted(String),
    Resumed,
}

/// Test subscriber that records every notification it receives.
#[derive(Default)]
pub struct Recording {
    events: Mutex<Vec<Event>>,
}

impl Recording {
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// All content chunks concatenated in delivery order.
    pub fn joined_content(&self) -> String {
        self.snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Event::Content(chunk) => Some(chunk),
                _ => None,
            })
            .collect()
    }

    /// Number of content deliveries.
    pub fn content_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|e| matches!(e, Event::Content(_)))
            .count()
    }

    /// Number of interruption events whose reason contains `needle`.
    pub fn interruptions_containing(&self, needle: &str) -> usize {
        self.snapshot()
            .iter()
            .filter(|e| matches!(e, Event::Interrupted(reason) if reason.contains(needle)))
            .count()
    }

    pub fn saw_resumed(&self) -> bool {
        self.snapshot().iter().any(|e| matches!(e, Event::Resumed))
    }

    pub fn saw_cleared(&self) -> bool {
        self.snapshot().iter().any(|e| matches!(e, Event::Cleared))
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Subscriber for Recording {
    fn on_content(&self, _key: &str, chunk: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Content(chunk.to_string()));
    }

    fn on_cleared(&self, _key: &str) {
        self.events.lock().unwrap().push(Event::Cleared);
    }

    fn on_interrupted(&self, _key: &str, reason: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Interrupted(reason.to_string()));
    }

    fn on_resumed(&self, _key: &str) {
        self.events.lock().unwrap().push(Event::Resumed);
    }
}

/// Poll `predicate` until it holds or `timeout` elapses. Returns whether the
/// predicate ever held.
pub async fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}

/// Generous deadline for filesystem-event driven assertions.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Append `content` to the file at `path`.
pub fn append(path: &std::path::Path, content: &str) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
}

/// Set a file's modification time, for deterministic newest-match ordering.
pub fn set_mtime(path: &std::path::Path, time: std::time::SystemTime) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}
