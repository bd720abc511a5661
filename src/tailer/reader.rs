//! Incremental content reader.
//!
//! Reads newly appended text from a file as it grows, tracking the read
//! position across calls.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::config::ReadMode;
use super::error::TailError;
use super::fingerprint::Fingerprint;

/// Incremental file reader that tracks read position and fingerprint.
///
/// The file is opened per read rather than held open, so a replaced file is
/// always read at its current path and a vanished file surfaces as
/// [`TailError::FileDeleted`] instead of silently reading a stale handle.
#[derive(Debug)]
pub struct ContentReader {
    /// Path being read.
    path: PathBuf,
    /// Current byte offset in the file.
    offset: u64,
    /// Last-known fingerprint, updated by the owning worker's reconciliation.
    fingerprint: Fingerprint,
}

impl ContentReader {
    /// Open `path` and read its initial content according to `mode`.
    ///
    /// Leaves the offset at end-of-file so subsequent [`read_new`] calls
    /// return only appended content.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::FileDeleted`] if the file is missing,
    /// [`TailError::AccessDenied`] if it cannot be read, or
    /// [`TailError::Io`] for other I/O failures.
    ///
    /// [`read_new`]: ContentReader::read_new
    pub async fn open(
        path: &Path,
        mode: ReadMode,
        tail_line_limit: usize,
    ) -> Result<(Self, String), TailError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TailError::FileDeleted(path.to_path_buf()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(TailError::AccessDenied(path.to_path_buf()));
            }
            Err(e) => return Err(TailError::Io(e)),
        };

        let fingerprint = Fingerprint::capture(path)
            .await
            .ok_or_else(|| TailError::FileDeleted(path.to_path_buf()))?;

        let content = String::from_utf8_lossy(&bytes).into_owned();
        let initial = match mode {
            ReadMode::FullHistory => content,
            ReadMode::TailOnly => last_lines(&content, tail_line_limit),
        };

        Ok((
            Self {
                path: path.to_path_buf(),
                offset: bytes.len() as u64,
                fingerprint,
            },
            initial,
        ))
    }

    /// Read content appended since the last read.
    ///
    /// Returns an empty string when the file has not grown.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::FileDeleted`] when the file is gone,
    /// [`TailError::Replaced`] when the path now names a different file (the
    /// caller reloads and clears downstream state), [`TailError::Truncated`]
    /// when the file is now smaller than the read offset (the caller resets
    /// and re-reads), [`TailError::AccessDenied`] or [`TailError::Io`] on
    /// other failures.
    pub async fn read_new(&mut self) -> Result<String, TailError> {
        let mut file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TailError::FileDeleted(self.path.clone()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(TailError::AccessDenied(self.path.clone()));
            }
            Err(e) => return Err(TailError::Io(e)),
        };

        let metadata = file.metadata().await?;
        let file_len = metadata.len();

        // A changed identity means this is not the file the offset belongs
        // to; shrinkage without an identity change is in-place truncation.
        // On platforms without file identities the former degrades to the
        // latter.
        if Fingerprint::from_metadata(&metadata).identity != self.fingerprint.identity {
            return Err(TailError::Replaced);
        }
        if file_len < self.offset {
            return Err(TailError::Truncated);
        }
        if file_len == self.offset {
            return Ok(String::new());
        }

        file.seek(std::io::SeekFrom::Start(self.offset)).await?;

        let mut buf = Vec::new();
        let bytes_read = file.read_to_end(&mut buf).await?;
        self.offset += bytes_read as u64;

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Reset the offset to the beginning of the file.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Path being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current byte offset.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Last-known fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Record a freshly captured fingerprint.
    ///
    /// The recorded size is clamped to the bytes actually consumed, so
    /// content that landed between the read and the capture still registers
    /// as growth on the next comparison.
    pub fn record_fingerprint(&mut self, mut fingerprint: Fingerprint) {
        fingerprint.size = fingerprint.size.min(self.offset);
        self.fingerprint = fingerprint;
    }
}

/// Last `limit` lines of `content`, line endings preserved.
pub(crate) fn last_lines(content: &str, limit: usize) -> String {
    if limit == 0 {
        return String::new();
    }
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    if lines.len() <= limit {
        content.to_string()
    } else {
        lines[lines.len() - limit..].concat()
    }
}
