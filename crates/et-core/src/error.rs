//! Error types for EpiTrend

use thiserror::Error;

/// EpiTrend error type
#[derive(Error, Debug)]
pub enum Error {
    /// Incompatible or invalid configuration. Raised before any sampling.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input series (non-monotonic dates, duplicates, all-missing).
    #[error("Data error: {0}")]
    Data(String),

    /// The posterior sampling engine produced zero usable draws.
    #[error("Sampling failure: {0}")]
    Sampling(String),

    /// Numerical computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
