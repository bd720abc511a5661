//! Per-tailer configuration.

use std::time::Duration;

/// How much of an existing file to emit when tailing begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Read and emit the entire file before following appends.
    #[default]
    FullHistory,
    /// Emit only the last `tail_line_limit` lines before following appends.
    TailOnly,
}

/// Configuration consumed at tailer construction.
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Initial read mode.
    pub mode: ReadMode,
    /// Line count emitted in [`ReadMode::TailOnly`]. Files may use larger
    /// limits, up to the hub's buffer capacity.
    pub tail_line_limit: usize,
    /// Worker poll tick interval.
    pub poll_interval: Duration,
    /// Fingerprint reconciliation runs every this many poll ticks.
    pub reconcile_ticks: u32,
    /// Bound on the join wait in `stop()`. A worker that misses this deadline
    /// is abandoned and may leak its watch handle.
    pub stop_timeout: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            mode: ReadMode::FullHistory,
            tail_line_limit: 200,
            poll_interval: Duration::from_millis(100),
            reconcile_ticks: 10,
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl TailConfig {
    /// Tail-only configuration with the given line limit.
    #[must_use]
    pub fn tail_only(tail_line_limit: usize) -> Self {
        Self {
            mode: ReadMode::TailOnly,
            tail_line_limit,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TailConfig::default();
        assert_eq!(config.mode, ReadMode::FullHistory);
        assert_eq!(config.tail_line_limit, 200);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.reconcile_ticks, 10);
    }

    #[test]
    fn test_tail_only_config() {
        let config = TailConfig::tail_only(50);
        assert_eq!(config.mode, ReadMode::TailOnly);
        assert_eq!(config.tail_line_limit, 50);
    }
}
