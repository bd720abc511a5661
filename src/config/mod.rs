//! Engine configuration.

mod loader;

pub use loader::{ConfigError, ConfigLoader, EngineConfig, LogFormat};
