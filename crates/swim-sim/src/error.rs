//! Error types for swim-sim.

use swim_types::NodeAddr;
use thiserror::Error;

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while setting up or reporting on a simulation.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid simulation or scenario settings.
    #[error("invalid simulation config: {0}")]
    Config(String),

    /// A node could not be built or started.
    #[error("node error: {0}")]
    Node(#[from] swim_node::Error),

    /// Two nodes with the same identity.
    #[error("node {0} already exists")]
    DuplicateNode(NodeAddr),

    /// Report rendering failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
