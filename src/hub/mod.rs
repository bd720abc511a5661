//! Ingestion hub.
//!
//! The single point every tailer writes to and every consumer reads from: a
//! thread-safe broker holding a bounded content buffer per registered source
//! and fanning new content out to subscribers.
//!
//! # Guarantees
//!
//! - Per key, chunks are delivered to all subscribers in publish order.
//! - A new subscriber receives the buffered content exactly once as catch-up
//!   before any live increment, with no gap and no duplicate between them.
//! - One subscriber's slowness or panic never delays buffer publication or
//!   delivery to other subscribers.

mod broker;
mod buffer;
mod subscriber;

pub use broker::IngestHub;
pub use buffer::{SourceBuffer, SourceStats, DEFAULT_MAX_LINES};
pub use subscriber::Subscriber;
