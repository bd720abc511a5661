//! Shared worker plumbing for tailer tasks.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Commands delivered to a running tailer worker.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TailCommand {
    /// Suppress emission, keep buffering reads.
    Pause,
    /// Flush buffered reads as one increment and resume emission.
    Resume,
}

/// Handle to a spawned tailer worker task.
pub(crate) struct WorkerHandle {
    pub cancel: CancellationToken,
    pub commands: mpsc::UnboundedSender<TailCommand>,
    pub task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cooperative stop with a bounded join wait.
    ///
    /// A worker that misses the deadline is abandoned, not killed; its watch
    /// registration is released only when the task eventually observes the
    /// cancellation, and may leak if it never does.
    pub async fn stop(self, timeout: Duration, key: &str) {
        self.cancel.cancel();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => tracing::debug!(key, "Tailer worker stopped"),
            Ok(Err(e)) => tracing::warn!(key, error = %e, "Tailer worker panicked"),
            Err(_) => tracing::warn!(
                key,
                "Tailer worker missed stop deadline; abandoning task, resources may leak"
            ),
        }
    }
}
