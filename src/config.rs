//! TOML configuration for the standard serial pipeline
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration apart from the device path.
//!
//! ```toml
//! [serial]
//! device = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [dump]
//! path = "capture.log"
//! mode = "overwrite"
//!
//! [parser]
//! delimiter = ";"
//! trim = "line"
//!
//! [queue]
//! capacity = 1024
//! overflow = "drop_newest"
//! ```

use crate::nodes::{FileMode, TrimPolicy};
use crate::runtime::{OverflowPolicy, QueueCapacity};
use crate::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Source stage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Fixed delay before each read, in milliseconds (0 = none)
    pub delay_ms: u64,
}

/// Log file settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Log file; no file dump stage when unset
    pub path: Option<PathBuf>,
    pub mode: FileMode,
    pub flush_interval_ms: u64,
    /// Flush early once this many bytes are buffered
    pub flush_threshold: Option<usize>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            path: None,
            mode: FileMode::Append,
            flush_interval_ms: 5000,
            flush_threshold: None,
        }
    }
}

/// Line splitter settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Polling delay in milliseconds (0 = wait on the queue instead)
    pub delay_ms: u64,
}

/// CSV parser settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub delimiter: char,
    pub trim: TrimPolicy,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            trim: TrimPolicy::PerField,
        }
    }
}

/// Queue sizing for every inter-stage connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued payloads per connection (unbounded when unset)
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    pub fn capacity(&self) -> QueueCapacity {
        match self.capacity {
            Some(n) => QueueCapacity::Bounded(n, self.overflow),
            None => QueueCapacity::Unbounded,
        }
    }
}

/// Display stage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Echo every decoded line to a display stage
    pub echo_lines: bool,
}

/// Complete configuration of the standard topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub source: SourceConfig,
    pub dump: DumpConfig,
    pub splitter: SplitterConfig,
    pub parser: ParserConfig,
    pub queue: QueueConfig,
    pub display: DisplayConfig,
}

impl AppConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check settings that the stages cannot recover from at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.serial
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.queue.capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "queue capacity must be positive".to_string(),
            ));
        }
        if self.dump.path.is_some() && self.dump.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "flush interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn source_delay(&self) -> Option<Duration> {
        non_zero_millis(self.source.delay_ms)
    }

    pub fn splitter_delay(&self) -> Option<Duration> {
        non_zero_millis(self.splitter.delay_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.dump.flush_interval_ms)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
