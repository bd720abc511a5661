//! Subscriber contract.

/// Receiver of per-source content and lifecycle notifications.
///
/// Implemented by viewer windows, diagnostic bridges, and test doubles alike.
/// All callbacks are invoked synchronously from the publishing context, so
/// implementations must not block; hand long work off to another task.
///
/// A panicking callback is caught and logged by the hub and never prevents
/// delivery to other subscribers.
pub trait Subscriber: Send + Sync {
    /// New content is available for `key`. Called once with the full buffer
    /// snapshot on subscription (catch-up), then once per published chunk.
    fn on_content(&self, key: &str, chunk: &str);

    /// The buffer for `key` was cleared (for example after the source file
    /// was replaced).
    fn on_cleared(&self, key: &str);

    /// The source stream for `key` was interrupted.
    fn on_interrupted(&self, key: &str, reason: &str);

    /// The source stream for `key` resumed after an interruption.
    fn on_resumed(&self, key: &str);
}
