//! Collaborator payloads: status snapshots and peer samples.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{NodeAddr, PeerAddress};
use crate::message::Incarnation;

/// Periodic snapshot of a node's membership view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status_nr: u64,
    pub received_pings: u64,
    pub sent_pings: u64,
    pub alive: BTreeMap<NodeAddr, Incarnation>,
    pub suspected: BTreeMap<NodeAddr, Incarnation>,
    pub dead: BTreeMap<NodeAddr, Incarnation>,
}

impl Status {
    /// Nodes this snapshot considers live (alive or suspected).
    pub fn live(&self) -> impl Iterator<Item = &NodeAddr> {
        self.alive.keys().chain(self.suspected.keys())
    }
}

/// A random sample of candidate peers from the peer-sampling feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub peers: Vec<PeerAddress>,
}

impl Sample {
    pub fn new(peers: Vec<PeerAddress>) -> Self {
        Self { peers }
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
