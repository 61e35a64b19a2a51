//! SWIM Membership - the incarnation-tagged membership directory.
//!
//! Pure state, no I/O. The [`Directory`] tracks every known peer as Alive,
//! Suspected or Dead, keeps a [`SendBuffer`] of pending gossip and hands out
//! probe targets round-robin over a shuffled cycle.
//!
//! # Update rules
//!
//! | Call | Accepted when |
//! |------|---------------|
//! | `record_alive(.., Gossip)` | incarnation > stored |
//! | `record_alive(.., Direct)` | incarnation >= stored |
//! | `record_suspected(.., Some(i))` | i >= stored |
//! | `record_suspected(.., None)` | peer is live (stored incarnation reused) |
//! | `record_dead(.., Some(i))` | always |
//! | `record_dead(.., None)` | peer is Suspected |
//!
//! Dead is terminal, and self is never recorded.

mod buffer;
mod cycle;
mod directory;
mod entry;

pub use buffer::{retransmit_limit, BufferedRumor, RumorKind, SendBuffer};
pub use cycle::ProbeCycle;
pub use directory::{Directory, DirectoryConfig, Evidence};
pub use entry::{MemberStatus, MembershipEntry};
