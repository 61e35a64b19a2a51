//! SWIM Types - addresses, protocol messages and relay envelopes.
//!
//! This crate holds the data model shared by every layer of a SWIM node:
//!
//! - [`NodeAddr`]: the stable identity of a node (`ip`, `port`, `id`)
//! - [`PeerAddress`]: identity plus reachability. A NAT'd peer carries the
//!   [`ParentSet`] of open relays that can reach it.
//! - [`SwimMessage`] / [`NatMessage`]: the failure detector and relay
//!   heartbeat protocols
//! - [`Envelope`] / [`Route`]: a payload plus its direct, source-routed or
//!   relayed header
//! - [`Status`]: the periodic snapshot handed to the status reporter
//!
//! # Identity
//!
//! Membership is keyed strictly by [`NodeAddr`]. The parent set of a NAT'd peer
//! is mutable, versioned metadata and is never used as a map key, which is why
//! [`PeerAddress`] deliberately does not implement `Hash`.

mod address;
mod error;
mod message;
mod status;
mod timer;

pub use address::{NodeAddr, ParentSet, PeerAddress, Reachability};
pub use error::{Error, Result};
pub use message::{
    Envelope, Header, Incarnation, NatMessage, Payload, PingNr, Pong, RelayHeader, Route, Rumor,
    SourceHeader, SwimMessage,
};
pub use status::{Sample, Status};
pub use timer::{TimerId, TimerTable};
