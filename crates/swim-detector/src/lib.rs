//! SWIM Detector - probing, suspicion and refutation.
//!
//! The [`FailureDetector`] drives the SWIM probe ladder against a
//! [`swim_membership::Directory`]:
//!
//! 1. Every `probe_interval` it pings the next peer of the probe cycle.
//! 2. Without a pong within `ping_timeout` the peer is suspected and K helpers
//!    are asked to probe it indirectly.
//! 3. After `suspected_timeout` + `dead_timeout` without any direct or
//!    indirect answer the peer is declared dead.
//!
//! Gossip rides on every pong. A node that finds itself in a pong's suspected
//! list raises its incarnation and broadcasts `Alive` to refute.
//!
//! ```text
//! ┌──────────┐  SwimMessage / TimerId   ┌──────────────────┐
//! │  caller  │ ───────────────────────▶ │ FailureDetector  │
//! │ (host)   │ ◀─────────────────────── │  + Directory     │
//! └──────────┘        Vec<Effect>       └──────────────────┘
//! ```

mod config;
mod engine;
mod error;

pub use config::DetectorConfig;
pub use engine::{Counters, Effect, FailureDetector, IndirectProbe, ProbeRecord, TimerEvent};
pub use error::{Error, Result};
