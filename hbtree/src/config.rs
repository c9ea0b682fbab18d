//! Node configuration.
//!
//! A [`HeartbeatConfig`] describes one node: how many heartbeats the sliding
//! window covers, how many records the ring buffer retains, the accuracy
//! assumed when a registration does not report one, and where records are
//! logged. Configurations are plain serde types so they can be embedded in an
//! application's own config file or loaded from JSON with
//! [`HeartbeatConfig::load`].
//!
//! ```rust
//! use hbtree::{HeartbeatConfig, LogFormat};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HeartbeatConfig::new(20, 20)?.with_log("heartbeat.log", LogFormat::Text);
//! assert_eq!(config.window_size, 20);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Accuracy used by registrations that do not report one.
pub const DEFAULT_ACCURACY: f64 = 0.0;

/// Configuration for a single heartbeat node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Number of most recent heartbeats covered by window metrics.
    pub window_size: usize,

    /// Number of records retained by the ring buffer.
    ///
    /// Must be at least `window_size`. Records are flushed to the log sink
    /// every time the buffer fills.
    pub buffer_depth: usize,

    /// Accuracy assumed when a registration does not report one.
    #[serde(default = "default_accuracy")]
    pub default_accuracy: f64,

    /// Where records are logged, if anywhere.
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Destination and format of a node's record log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log file path. The file is truncated when the node is built.
    pub path: PathBuf,

    /// Line format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Line format for record logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Header line followed by one tab-separated line per record.
    #[default]
    Text,
    /// One JSON object per record, no header.
    JsonLines,
}

fn default_accuracy() -> f64 {
    DEFAULT_ACCURACY
}

impl HeartbeatConfig {
    /// Creates a validated configuration with no log and the default accuracy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `window_size` is zero or larger than
    /// `buffer_depth`.
    pub fn new(window_size: usize, buffer_depth: usize) -> Result<Self> {
        let config = Self {
            window_size,
            buffer_depth,
            default_accuracy: DEFAULT_ACCURACY,
            log: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the log destination.
    #[must_use]
    pub fn with_log<P: Into<PathBuf>>(mut self, path: P, format: LogFormat) -> Self {
        self.log = Some(LogConfig {
            path: path.into(),
            format,
        });
        self
    }

    /// Sets the accuracy assumed by registrations that do not report one.
    #[must_use]
    pub fn with_default_accuracy(mut self, accuracy: f64) -> Self {
        self.default_accuracy = accuracy;
        self
    }

    /// Validates the configuration.
    ///
    /// Nothing is allocated or opened by a node until its configuration
    /// passes this check.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroWindow`] if `window_size` is zero
    /// - [`ConfigError::BufferTooShallow`] if `buffer_depth < window_size`
    /// - [`ConfigError::InvalidDefaultAccuracy`] if the default accuracy is not finite
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow.into());
        }

        if self.buffer_depth < self.window_size {
            return Err(ConfigError::BufferTooShallow {
                window_size: self.window_size,
                buffer_depth: self.buffer_depth,
            }
            .into());
        }

        if !self.default_accuracy.is_finite() {
            return Err(ConfigError::InvalidDefaultAccuracy {
                value: self.default_accuracy,
            }
            .into());
        }

        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if the file
    /// cannot be read or decoded, and any [`validate`](Self::validate) error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }
}
