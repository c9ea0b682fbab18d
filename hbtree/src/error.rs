//! Error types for the hbtree heartbeat library.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all hbtree operations.
///
/// Registration itself never fails; errors surface while validating
/// configuration, while constructing a node, and while writing records to a
/// sink.
#[derive(Error, Debug)]
pub enum HbError {
    /// Configuration validation or loading failed.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A node could not be constructed.
    #[error("construction error: {0}")]
    Construction(#[from] ConstructionError),

    /// A record sink failed to write, serialize, or parse records.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Errors that can occur while validating or loading a node configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The window must cover at least one heartbeat.
    #[error("window size must be > 0")]
    ZeroWindow,

    /// The ring buffer cannot hold a full window.
    #[error("buffer depth {buffer_depth} must be >= window size {window_size}")]
    BufferTooShallow {
        /// The requested window size.
        window_size: usize,
        /// The requested buffer depth.
        buffer_depth: usize,
    },

    /// The default accuracy is NaN or infinite.
    #[error("default accuracy must be finite, got {value}")]
    InvalidDefaultAccuracy {
        /// The rejected value.
        value: f64,
    },

    /// The config file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for a [`crate::HeartbeatConfig`].
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur while constructing a heartbeat node.
///
/// Every resource acquired before the failure has already been released when
/// one of these is returned.
#[derive(Error, Debug)]
pub enum ConstructionError {
    /// The record ring buffer could not be allocated.
    #[error("failed to allocate ring buffer of {buffer_depth} records")]
    Allocation {
        /// The requested buffer depth.
        buffer_depth: usize,
    },

    /// An energy backend reported an empty source name.
    #[error("energy backend at index {index} has no source name")]
    MissingSource {
        /// Position of the backend in the configured list.
        index: usize,
    },

    /// An energy backend failed to initialize.
    #[error("failed to initialize energy backend '{source_name}' (index {index}): {source}")]
    BackendInit {
        /// Position of the backend in the configured list.
        index: usize,
        /// The backend's source name.
        source_name: String,
        /// The underlying error reported by the backend.
        #[source]
        source: std::io::Error,
    },

    /// The log file could not be created.
    #[error("failed to open heartbeat log '{}': {source}", path.display())]
    SinkOpen {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The sink rejected the header line.
    #[error("failed to write heartbeat log header: {0}")]
    SinkHeader(#[source] SinkError),
}

/// Errors that can occur while writing or reading heartbeat records.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Writing to the underlying writer failed.
    #[error("failed to write records: {0}")]
    Write(#[from] std::io::Error),

    /// Reading from an opened log failed.
    #[error("failed to read log: {0}")]
    Read(#[source] std::io::Error),

    /// A record could not be serialized.
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A log file could not be opened for reading.
    #[error("failed to open log '{}': {source}", path.display())]
    Open {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A log line could not be parsed back into a record.
    #[error("malformed log line {line}: {reason}")]
    Parse {
        /// 1-based line number in the log.
        line: usize,
        /// Description of what was wrong.
        reason: String,
    },
}

/// Type alias for `Result<T, HbError>`.
pub type Result<T> = std::result::Result<T, HbError>;
