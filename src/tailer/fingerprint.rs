//! File fingerprinting for change detection.
//!
//! A [`Fingerprint`] captures the (mtime, size, identity) triple used to tell
//! appends, truncation, and replacement apart without reading file content.

use std::path::Path;
use std::time::SystemTime;

/// Snapshot of a file's metadata used for change detection.
///
/// Two fingerprints describe "the same file occupying the same position" only
/// when `identity` matches. A shrinking `size` under the same `identity`
/// signals truncation; a changed `identity` signals replacement (delete and
/// recreate, or a rotation rename).
///
/// `identity` is the inode number on Unix. On platforms without a stable file
/// identity it is 0 and replacement detection falls back to the size/mtime
/// checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// Last modification time.
    pub modified_at: SystemTime,
    /// File size in bytes.
    pub size: u64,
    /// Platform file identity (inode or equivalent).
    pub identity: u64,
}

impl Fingerprint {
    /// Capture the current fingerprint of `path`.
    ///
    /// Returns `None` when the file is missing or its metadata cannot be
    /// read, which callers treat as "file gone".
    pub async fn capture(path: &Path) -> Option<Self> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        Some(Self::from_metadata(&metadata))
    }

    /// Fingerprint of already-fetched metadata.
    pub(crate) fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            modified_at: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: metadata.len(),
            identity: file_identity(metadata),
        }
    }

    /// Whether `current` describes a different file at the same path.
    #[must_use]
    pub fn replaced_by(&self, current: &Self) -> bool {
        self.identity != current.identity
    }

    /// Whether `current` shows the same file truncated below its prior size.
    #[must_use]
    pub fn truncated_by(&self, current: &Self) -> bool {
        self.identity == current.identity && current.size < self.size
    }

    /// Whether `current` shows growth or a newer mtime, i.e. content may have
    /// been appended without a corresponding watcher event.
    #[must_use]
    pub fn outgrown_by(&self, current: &Self) -> bool {
        current.size > self.size || current.modified_at > self.modified_at
    }
}

#[cfg(unix)]
fn file_identity(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn file_identity(_metadata: &std::fs::Metadata) -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_capture_missing_file() {
        let fp = Fingerprint::capture(Path::new("/tmp/nonexistent-fingerprint-12345.log")).await;
        assert!(fp.is_none());
    }

    #[tokio::test]
    async fn test_capture_records_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "hello\n").unwrap();

        let fp = Fingerprint::capture(&path).await.unwrap();
        assert_eq!(fp.size, 6);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_replacement_changes_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first\n").unwrap();
        let before = Fingerprint::capture(&path).await.unwrap();

        // Rotation rename: the replacement exists alongside the original, so
        // the two necessarily have distinct inodes.
        let staging = dir.path().join("app.log.new");
        std::fs::write(&staging, "second\n").unwrap();
        std::fs::rename(&staging, &path).unwrap();
        let after = Fingerprint::capture(&path).await.unwrap();

        assert!(before.replaced_by(&after));
    }

    #[tokio::test]
    async fn test_truncation_detected_by_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "a long line of content\n").unwrap();
        let before = Fingerprint::capture(&path).await.unwrap();

        // Truncate in place: same inode, smaller size.
        let file = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        drop(file);
        let after = Fingerprint::capture(&path).await.unwrap();

        assert!(before.truncated_by(&after));
        assert!(!before.replaced_by(&after));
    }

    #[tokio::test]
    async fn test_append_detected_as_growth() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "one\n").unwrap();
        let before = Fingerprint::capture(&path).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "two").unwrap();
        file.flush().unwrap();

        let after = Fingerprint::capture(&path).await.unwrap();
        assert!(before.outgrown_by(&after));
        assert!(!before.truncated_by(&after));
    }
}
