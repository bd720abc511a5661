//! Bounded per-source content buffer.

use std::collections::VecDeque;

/// Default cap on buffered lines per source.
pub const DEFAULT_MAX_LINES: usize = 10_000;

/// Diagnostics snapshot for a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStats {
    /// Lines currently held in the buffer.
    pub buffered_lines: usize,
    /// Total lines received over the buffer's lifetime, including evicted
    /// ones.
    pub total_received: u64,
}

/// Append-only bounded buffer of the most recent content lines for one
/// source.
///
/// Content is stored as newline-inclusive fragments so concatenating the
/// buffer reproduces the original byte stream of the retained window.
#[derive(Debug)]
pub struct SourceBuffer {
    max_lines: usize,
    lines: VecDeque<String>,
    total_received: u64,
}

impl SourceBuffer {
    /// Create a buffer retaining at most `max_lines` lines.
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            lines: VecDeque::new(),
            total_received: 0,
        }
    }

    /// Append a chunk, which may contain multiple lines. Oldest lines are
    /// evicted beyond the cap.
    pub fn append(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        for line in chunk.split_inclusive('\n') {
            self.lines.push_back(line.to_string());
            self.total_received += 1;
        }
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// Full buffered content as one string.
    #[must_use]
    pub fn content(&self) -> String {
        self.lines.iter().map(String::as_str).collect()
    }

    /// Drop all buffered lines. The receipt counter is retained.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Number of buffered lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the buffer holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Diagnostics snapshot.
    #[must_use]
    pub fn stats(&self) -> SourceStats {
        SourceStats {
            buffered_lines: self.lines.len(),
            total_received: self.total_received,
        }
    }
}
