//! Engine configuration loader.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tailer::{ReadMode, TailConfig};

/// Output format for the binary's own diagnostic logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum lines buffered per source in the hub.
    pub max_buffer_lines: usize,
    /// Tailer poll tick interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Fingerprint reconciliation cadence, in poll ticks.
    pub reconcile_ticks: u32,
    /// Lines emitted for tail-only initial reads.
    pub tail_line_limit: usize,
    /// Bound on the stop join wait in milliseconds.
    pub stop_timeout_ms: u64,
    /// Diagnostic log format.
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffer_lines: crate::hub::DEFAULT_MAX_LINES,
            poll_interval_ms: 100,
            reconcile_ticks: 10,
            tail_line_limit: 200,
            stop_timeout_ms: 1000,
            log_format: LogFormat::Text,
        }
    }
}

impl EngineConfig {
    /// Derive a per-tailer configuration with the given read mode.
    #[must_use]
    pub fn tail_config(&self, mode: ReadMode) -> TailConfig {
        TailConfig {
            mode,
            tail_line_limit: self.tail_line_limit,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            reconcile_ticks: self.reconcile_ticks,
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .tailhub.toml
        search_paths.push(PathBuf::from(".tailhub.toml"));

        // 2. User config directory: ~/.config/tailhub/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("tailhub").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<EngineConfig, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                return Self::load_from_path(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(EngineConfig::default())
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: &PathBuf) -> Result<EngineConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}
