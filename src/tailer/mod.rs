//! Tailers: rotation-safe followers of append-only text sources.
//!
//! A [`FileTailer`] follows one path through creation, deletion, truncation,
//! and replacement; a [`PatternTailer`] follows the newest file matching a
//! glob pattern, hot-switching as newer matches appear. Both publish to the
//! ingestion hub and share per-directory OS watches through a
//! [`WatchRegistry`].

mod config;
mod error;
mod file;
mod fingerprint;
mod pattern;
mod reader;
mod watch;
mod worker;

pub use config::{ReadMode, TailConfig};
pub use error::TailError;
pub use file::FileTailer;
pub use fingerprint::Fingerprint;
pub use pattern::PatternTailer;
pub use reader::ContentReader;
pub use watch::{DirWatch, FsEvent, FsEventKind, WatchRegistry};

/// Banner published into the content stream when a source is re-read after
/// truncation or replacement. A display convention for human readers, not a
/// protocol.
pub const RELOAD_SEPARATOR: &str = "\n============= File Reloaded =============\n";
