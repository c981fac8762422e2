//! Error types for the Turnstile rate limiter.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors, raised when a limiter or the service is built
    #[error("Configuration error: {0}")]
    Config(String),

    /// A `check_limit` call asked for zero units of capacity
    #[error("Invalid cost: {0} (cost must be at least 1)")]
    InvalidCost(u64),

    /// The limiter store could not be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Response encoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for TurnstileError {
    fn from(err: StoreError) -> Self {
        TurnstileError::StorageUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
