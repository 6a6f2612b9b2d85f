//! Error types for the sluice ingestion core.

use thiserror::Error;

/// Main error type for buffer-and-drain operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Record failed construction-time validation
    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Operation attempted in the wrong lifecycle state
    #[error("Invalid state for {operation}: service is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// A single record can never fit in its drainer queue
    #[error("Record of {size} bytes exceeds drainer capacity of {capacity} bytes")]
    RecordTooLarge { size: usize, capacity: usize },

    /// Blocking operation cancelled by shutdown
    #[error("Operation cancelled by shutdown: {operation}")]
    Cancelled { operation: &'static str },

    /// Drain barrier exhausted its retry budget
    #[error(
        "Records for {topic}-{partition} still buffered in drainer {drainer} after {retries} probes"
    )]
    DrainTimeout {
        topic: String,
        partition: u32,
        drainer: usize,
        retries: u32,
    },

    /// Worker thread creation failed during start
    #[error("Failed to start drainer pool: {message}")]
    StartFailure { message: String },

    /// Worker threads still alive when the stop deadline expired
    #[error("{pending} drainer thread(s) still running after stop timeout")]
    ShutdownTimeout { pending: usize },
}

/// Result type alias for sluice operations.
pub type Result<T> = std::result::Result<T, Error>;
