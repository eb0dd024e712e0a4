//! Error types for Chronycle

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for Chronycle operations
pub type Result<T> = std::result::Result<T, ChronycleError>;

/// Errors that can occur in Chronycle
#[derive(Debug, Error)]
pub enum ChronycleError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Filter pattern failed to compile as a regular expression
    #[error("Invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Pattern as supplied by the caller
        pattern: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },

    /// Transport failure talking to the collector
    #[error("Transport error: {0}")]
    Transport(String),

    /// Delivery exceeded its time budget
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Collector answered with a non-success status
    #[error("Collector rejected recording with status {0}")]
    RejectedStatus(u16),

    /// Record could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ChronycleError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
