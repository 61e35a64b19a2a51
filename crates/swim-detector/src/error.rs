//! Error types for swim-detector.

use thiserror::Error;

/// Result type for swim-detector operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up a failure detector.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// A configuration value is out of range.
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),
}
