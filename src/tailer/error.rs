//! Tailer error types.

use std::path::PathBuf;

/// Errors that can occur while constructing or running a tailer.
#[derive(thiserror::Error, Debug)]
pub enum TailError {
    /// The source description is unusable (missing parent directory, or a
    /// pattern without wildcard characters). Raised at construction, never
    /// retried.
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// No read permission on the source file. Fatal at `start()`; the tailer
    /// does not retry on its own.
    #[error("Permission denied: {0}")]
    AccessDenied(PathBuf),

    /// The tailed file is gone (deleted or moved away). Drives the
    /// interrupted/awaiting-creation transition, not surfaced as a failure.
    #[error("Tailed file deleted: {0}")]
    FileDeleted(PathBuf),

    /// The tailed file shrank below the read offset. Drives the truncation
    /// recovery path.
    #[error("File truncated, offset reset required")]
    Truncated,

    /// The path now names a different file (rotation rename, or delete and
    /// recreate). Drives the reload path, which clears the downstream
    /// buffer.
    #[error("File replaced, reload required")]
    Replaced,

    /// Filesystem watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// I/O error. Transient mid-poll I/O errors are logged and retried on the
    /// next tick.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_source_display() {
        let err = TailError::InvalidSource("pattern has no wildcards: app.log".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid source: pattern has no wildcards: app.log"
        );
    }

    #[test]
    fn test_access_denied_display() {
        let err = TailError::AccessDenied(PathBuf::from("/root/secret.log"));
        assert_eq!(err.to_string(), "Permission denied: /root/secret.log");
    }

    #[test]
    fn test_file_deleted_display() {
        let err = TailError::FileDeleted(PathBuf::from("/tmp/app.log"));
        assert_eq!(err.to_string(), "Tailed file deleted: /tmp/app.log");
    }

    #[test]
    fn test_truncated_display() {
        let err = TailError::Truncated;
        assert_eq!(err.to_string(), "File truncated, offset reset required");
    }

    #[test]
    fn test_replaced_display() {
        let err = TailError::Replaced;
        assert_eq!(err.to_string(), "File replaced, reload required");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let tail_err: TailError = io_err.into();
        assert!(matches!(tail_err, TailError::Io(_)));
        assert!(tail_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_from_notify_error() {
        let notify_err = notify::Error::generic("test error");
        let tail_err: TailError = notify_err.into();
        assert!(matches!(tail_err, TailError::Notify(_)));
        assert!(tail_err.to_string().contains("File watcher error"));
    }
}
