//! Error types for swim-node.

use thiserror::Error;

/// Result type for swim-node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a node.
#[derive(Debug, Error)]
pub enum Error {
    /// Relay invariant violation or unroutable send.
    #[error("relay error: {0}")]
    Relay(#[from] swim_relay::Error),

    /// Invalid failure detector settings.
    #[error("detector error: {0}")]
    Detector(#[from] swim_detector::Error),

    /// Socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Invalid node configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the node has to stop. Only an unroutable send is survivable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Relay(e) => e.is_fatal(),
            _ => true,
        }
    }
}
