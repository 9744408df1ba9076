//! Error types for the gaze tracking library.
//!
//! Expected degenerate input (no face, collapsed eye geometry, singular
//! calibration systems) is reported through `Option`/`bool` returns. The
//! variants below cover genuine faults only.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Key-value storage read or write failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// The external landmark detector failed
    #[error("Landmark source error: {0}")]
    LandmarkSource(String),

    /// Stored calibration could not be decoded
    #[error("Calibration error: {0}")]
    CalibrationError(String),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
