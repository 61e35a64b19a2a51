//! SWIM Relay - the NAT relay layer.
//!
//! Sits between the failure detector and the network. Every outbound message
//! goes through [`NatRelay::send`] and every inbound envelope through
//! [`NatRelay::receive`].
//!
//! # Routing
//!
//! | Destination | Envelope | Physical hop |
//! |-------------|----------|--------------|
//! | open | `Route::Direct` | destination |
//! | NAT'd | `Route::Source` | a random parent of the destination |
//! | (parent forwarding) | `Route::Relay` | the NAT'd destination |
//!
//! A parent only forwards when the destination still lists it as a parent.
//! A source header at a NAT'd node or a relay header at an open node is a
//! fatal [`Error`].
//!
//! # Parent maintenance
//!
//! NAT'd nodes heartbeat every parent with `NatPing`. A parent that misses a
//! heartbeat is marked dead and replaced from the latest peer sample; the new
//! set is reported as [`RelayEffect::NewParents`].

mod config;
mod error;
mod relay;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use relay::{Delivery, NatRelay, RelayEffect, RelayTimer};
