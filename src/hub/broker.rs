//! The ingestion hub: a thread-safe broker between tailers and subscribers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::buffer::{SourceBuffer, SourceStats};
use super::subscriber::Subscriber;

struct SourceEntry {
    buffer: SourceBuffer,
    subscribers: Vec<Arc<dyn Subscriber>>,
    /// Serializes subscriber dispatch per key: held across buffer mutation
    /// and the callbacks, so delivery order matches publish order and a
    /// catch-up snapshot cannot interleave with a live publish.
    dispatch: Arc<Mutex<()>>,
}

/// Thread-safe broker between tailers (producers) and subscribers, keyed by
/// an opaque path-key string the hub never parses.
///
/// The source map lock is never held while subscriber callbacks run; a slow
/// subscriber delays only its own key's dispatch, never buffer publication
/// for other keys.
#[derive(Default)]
pub struct IngestHub {
    sources: Mutex<HashMap<String, SourceEntry>>,
}

impl IngestHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source with the given buffer capacity. No-op if the key is
    /// already registered.
    pub fn register(&self, key: &str, max_lines: usize) {
        let mut sources = lock(&self.sources);
        if sources.contains_key(key) {
            return;
        }
        sources.insert(
            key.to_string(),
            SourceEntry {
                buffer: SourceBuffer::new(max_lines),
                subscribers: Vec::new(),
                dispatch: Arc::new(Mutex::new(())),
            },
        );
        tracing::info!(key, "Registered source");
    }

    /// Remove a source, its buffer, and its subscriber list.
    pub fn unregister(&self, key: &str) {
        if lock(&self.sources).remove(key).is_some() {
            tracing::info!(key, "Unregistered source");
        }
    }

    /// Whether `key` is registered.
    #[must_use]
    pub fn is_registered(&self, key: &str) -> bool {
        lock(&self.sources).contains_key(key)
    }

    /// Append `chunk` to the source buffer and notify every subscriber.
    ///
    /// Publishing to an unregistered key is logged and dropped.
    pub fn publish(&self, key: &str, chunk: &str) {
        let Some(dispatch) = self.dispatch_guard(key) else {
            tracing::warn!(key, "Publish to unregistered source");
            return;
        };
        let _ordering = lock(&dispatch);

        let subscribers = {
            let mut sources = lock(&self.sources);
            let Some(entry) = sources.get_mut(key) else {
                return;
            };
            entry.buffer.append(chunk);
            entry.subscribers.clone()
        };

        for subscriber in &subscribers {
            deliver(key, "on_content", || subscriber.on_content(key, chunk));
        }
    }

    /// Add a subscriber for `key` and immediately deliver the current buffer
    /// content as catch-up, before any subsequent publish reaches it.
    ///
    /// Subscribing the same handle twice is a no-op.
    pub fn subscribe(&self, key: &str, subscriber: Arc<dyn Subscriber>) {
        let Some(dispatch) = self.dispatch_guard(key) else {
            tracing::warn!(key, "Subscribe to unregistered source");
            return;
        };
        let _ordering = lock(&dispatch);

        let catch_up = {
            let mut sources = lock(&self.sources);
            let Some(entry) = sources.get_mut(key) else {
                return;
            };
            if entry
                .subscribers
                .iter()
                .any(|s| Arc::ptr_eq(s, &subscriber))
            {
                return;
            }
            entry.subscribers.push(Arc::clone(&subscriber));
            tracing::debug!(key, "Added subscriber");
            if entry.buffer.is_empty() {
                None
            } else {
                Some(entry.buffer.content())
            }
        };

        if let Some(content) = catch_up {
            deliver(key, "on_content", || subscriber.on_content(key, &content));
        }
    }

    /// Remove a subscriber by handle identity.
    pub fn unsubscribe(&self, key: &str, subscriber: &Arc<dyn Subscriber>) {
        let mut sources = lock(&self.sources);
        if let Some(entry) = sources.get_mut(key) {
            entry.subscribers.retain(|s| !Arc::ptr_eq(s, subscriber));
        }
    }

    /// Clear the buffer for `key` and notify subscribers, used when a source
    /// file is replaced and its prior content is no longer relevant.
    pub fn clear(&self, key: &str) {
        let Some(dispatch) = self.dispatch_guard(key) else {
            return;
        };
        let _ordering = lock(&dispatch);

        let subscribers = {
            let mut sources = lock(&self.sources);
            let Some(entry) = sources.get_mut(key) else {
                return;
            };
            entry.buffer.clear();
            entry.subscribers.clone()
        };

        for subscriber in &subscribers {
            deliver(key, "on_cleared", || subscriber.on_cleared(key));
        }
    }

    /// Pass through a stream-interrupted notification. Not buffered as
    /// content.
    pub fn interrupted(&self, key: &str, reason: &str) {
        tracing::info!(key, reason, "Stream interrupted");
        let Some(dispatch) = self.dispatch_guard(key) else {
            return;
        };
        let _ordering = lock(&dispatch);

        for subscriber in &self.subscribers_of(key) {
            deliver(key, "on_interrupted", || {
                subscriber.on_interrupted(key, reason);
            });
        }
    }

    /// Pass through a stream-resumed notification. Not buffered as content.
    pub fn resumed(&self, key: &str) {
        tracing::info!(key, "Stream resumed");
        let Some(dispatch) = self.dispatch_guard(key) else {
            return;
        };
        let _ordering = lock(&dispatch);

        for subscriber in &self.subscribers_of(key) {
            deliver(key, "on_resumed", || subscriber.on_resumed(key));
        }
    }

    /// Snapshot of the buffered content for `key`, if registered.
    #[must_use]
    pub fn buffer_content(&self, key: &str) -> Option<String> {
        lock(&self.sources).get(key).map(|e| e.buffer.content())
    }

    /// Buffer diagnostics for `key`, if registered.
    #[must_use]
    pub fn stats(&self, key: &str) -> Option<SourceStats> {
        lock(&self.sources).get(key).map(|e| e.buffer.stats())
    }

    fn dispatch_guard(&self, key: &str) -> Option<Arc<Mutex<()>>> {
        lock(&self.sources)
            .get(key)
            .map(|e| Arc::clone(&e.dispatch))
    }

    fn subscribers_of(&self, key: &str) -> Vec<Arc<dyn Subscriber>> {
        lock(&self.sources)
            .get(key)
            .map(|e| e.subscribers.clone())
            .unwrap_or_default()
    }
}

/// Run one subscriber callback, containing panics so a failing subscriber
/// never blocks delivery to the others or the publishing tailer.
fn deliver<F: FnOnce()>(key: &str, callback: &str, f: F) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(key, callback, "Subscriber callback panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Content(String),
        Cleared,
        Interrupted(String),
        Resumed,
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<Event>>,
    }

    impl Recording {
        fn events(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock().unwrap())
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

    struct Panicking;

    impl Subscriber for Panicking {
        fn on_content(&self, _key: &str, _chunk: &str) {
            panic!("subscriber failure");
        }

        fn on_cleared(&self, _key: &str) {}
        fn on_interrupted(&self, _key: &str, _reason: &str) {}
        fn on_resumed(&self, _key: &str) {}
    }

    #[test]
    fn test_register_is_idempotent() {
        let hub = IngestHub::new();
        hub.register("app.log", 100);
        hub.publish("app.log", "kept\n");
        hub.register("app.log", 100);

        assert_eq!(hub.buffer_content("app.log").unwrap(), "kept\n");
    }

    #[test]
    fn test_publish_to_unregistered_key_is_dropped() {
        let hub = IngestHub::new();
        hub.publish("missing", "data\n");
        assert!(hub.buffer_content("missing").is_none());
    }

    #[test]
    fn test_publish_appends_and_notifies() {
        let hub = IngestHub::new();
        hub.register("app.log", 100);

        let sub = Arc::new(Recording::default());
        hub.subscribe("app.log", sub.clone());

        hub.publish("app.log", "one\n");
        hub.publish("app.log", "two\n");

        assert_eq!(hub.buffer_content("app.log").unwrap(), "one\ntwo\n");
        assert_eq!(
            sub.events(),
            vec![
                Event::Content("one\n".to_string()),
                Event::Content("two\n".to_string())
            ]
        );
    }

    #[test]
    fn test_subscribe_catch_up_then_live() {
        let hub = IngestHub::new();
        hub.register("app.log", 100);
        hub.publish("app.log", "L1\nL2\nL3\n");

        let sub = Arc::new(Recording::default());
        hub.subscribe("app.log", sub.clone());
        hub.publish("app.log", "L4\n");

        // Exactly one catch-up delivery, then the live chunk, no duplication.
        assert_eq!(
            sub.events(),
            vec![
                Event::Content("L1\nL2\nL3\n".to_string()),
                Event::Content("L4\n".to_string())
            ]
        );
    }

    #[test]
    fn test_subscribe_twice_is_noop() {
        let hub = IngestHub::new();
        hub.register("app.log", 100);

        let sub = Arc::new(Recording::default());
        hub.subscribe("app.log", sub.clone());
        hub.subscribe("app.log", sub.clone());

        hub.publish("app.log", "once\n");
        assert_eq!(sub.events(), vec![Event::Content("once\n".to_string())]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = IngestHub::new();
        hub.register("app.log", 100);

        let sub = Arc::new(Recording::default());
        hub.subscribe("app.log", sub.clone());
        let handle: Arc<dyn Subscriber> = sub.clone();
        hub.unsubscribe("app.log", &handle);

        hub.publish("app.log", "unseen\n");
        assert_eq!(sub.events(), vec![]);
    }

    #[test]
    fn test_clear_empties_buffer_and_notifies() {
        let hub = IngestHub::new();
        hub.register("app.log", 100);
        hub.publish("app.log", "old\n");

        let sub = Arc::new(Recording::default());
        hub.subscribe("app.log", sub.clone());
        sub.events();

        hub.clear("app.log");

        assert_eq!(hub.buffer_content("app.log").unwrap(), "");
        assert_eq!(sub.events(), vec![Event::Cleared]);
    }

    #[test]
    fn test_lifecycle_events_are_not_buffered() {
        let hub = IngestHub::new();
        hub.register("app.log", 100);

        let sub = Arc::new(Recording::default());
        hub.subscribe("app.log", sub.clone());

        hub.interrupted("app.log", "file deleted");
        hub.resumed("app.log");

        assert_eq!(hub.buffer_content("app.log").unwrap(), "");
        assert_eq!(
            sub.events(),
            vec![
                Event::Interrupted("file deleted".to_string()),
                Event::Resumed
            ]
        );
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let hub = IngestHub::new();
        hub.register("app.log", 100);

        hub.subscribe("app.log", Arc::new(Panicking));
        let sub = Arc::new(Recording::default());
        hub.subscribe("app.log", sub.clone());

        hub.publish("app.log", "delivered\n");

        assert_eq!(
            sub.events(),
            vec![Event::Content("delivered\n".to_string())]
        );
        // Buffer publication is unaffected by the panic.
        assert_eq!(hub.buffer_content("app.log").unwrap(), "delivered\n");
    }

    #[test]
    fn test_eviction_respects_capacity() {
        let hub = IngestHub::new();
        hub.register("app.log", 2);
        hub.publish("app.log", "1\n2\n3\n");

        assert_eq!(hub.buffer_content("app.log").unwrap(), "2\n3\n");
        let stats = hub.stats("app.log").unwrap();
        assert_eq!(stats.buffered_lines, 2);
        assert_eq!(stats.total_received, 3);
    }

    #[test]
    fn test_unregister_removes_source() {
        let hub = IngestHub::new();
        hub.register("app.log", 100);
        assert!(hub.is_registered("app.log"));

        hub.unregister("app.log");
        assert!(!hub.is_registered("app.log"));
        assert!(hub.stats("app.log").is_none());
    }
}
