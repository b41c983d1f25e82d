//! Common error types for tally

use thiserror::Error;

/// Common result type for tally operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the tally binaries
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote API failure that exhausted its retries
    #[error("Remote API error: {0}")]
    Api(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid or malformed upstream data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
