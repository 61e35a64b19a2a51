//! Error types for swim-types.

use thiserror::Error;

/// Result type for swim-types operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing addresses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The string is not of the form `id@ip:port`.
    #[error("invalid node address {0:?}: expected id@ip:port")]
    InvalidNodeAddr(String),
}
