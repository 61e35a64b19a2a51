//! Error types for swim-relay.

use swim_types::NodeAddr;
use thiserror::Error;

/// Result type for swim-relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Relay invariant violations and setup errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A NAT'd node was asked to relay.
    #[error("source header received on NAT'd node {node}")]
    SourceHeaderAtNatedNode { node: NodeAddr },

    /// A relayed message reached an open node.
    #[error("relay header received on open node {node}")]
    RelayHeaderAtOpenNode { node: NodeAddr },

    /// A configuration value is out of range.
    #[error("invalid relay configuration: {0}")]
    InvalidConfig(String),

    /// The NAT'd destination has no parents to route through.
    #[error("NAT'd destination {destination} has no parents")]
    Orphan { destination: NodeAddr },
}

impl Error {
    /// Header violations mean the relay invariant broke upstream and the node
    /// must stop. An orphan only fails the send.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Orphan { .. })
    }
}
