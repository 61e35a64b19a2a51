//! The membership directory.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use swim_types::{Incarnation, NodeAddr, PeerAddress, PingNr, Pong, Rumor};
use tracing::{debug, trace};

use crate::buffer::{retransmit_limit, RumorKind, SendBuffer};
use crate::cycle::ProbeCycle;
use crate::entry::{MemberStatus, MembershipEntry};

/// Directory tuning.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Maximum records piggybacked on one pong.
    pub max_message_size: usize,
    /// Dissemination redundancy factor.
    pub lambda: f64,
    /// Seed for probe order and helper selection.
    pub seed: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_message_size: 10_000,
            lambda: 3.0,
            seed: 0,
        }
    }
}

/// How an alive report reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// Second-hand gossip or a refutation. Needs a strictly higher
    /// incarnation to override.
    Gossip,
    /// A direct exchange with the peer itself. Equal incarnation suffices.
    Direct,
}

/// Incarnation-tagged view of every known peer, plus pending gossip.
#[derive(Debug)]
pub struct Directory {
    self_address: PeerAddress,
    entries: BTreeMap<NodeAddr, MembershipEntry>,
    buffer: SendBuffer,
    cycle: ProbeCycle,
    config: DirectoryConfig,
    rng: StdRng,
}

impl Directory {
    pub fn new(self_address: PeerAddress, config: DirectoryConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            self_address,
            entries: BTreeMap::new(),
            buffer: SendBuffer::new(),
            cycle: ProbeCycle::new(),
            config,
            rng,
        }
    }

    pub fn self_address(&self) -> &PeerAddress {
        &self.self_address
    }

    /// Update our own address (after a parent change).
    pub fn set_self_address(&mut self, address: PeerAddress) {
        self.self_address = address;
    }

    fn is_self(&self, peer: &NodeAddr) -> bool {
        *peer == self.self_address.id()
    }

    /// Record alive evidence. Returns `true` if the view changed.
    ///
    /// Dead peers and self are never (re)added.
    pub fn record_alive(
        &mut self,
        peer: &PeerAddress,
        incarnation: Incarnation,
        evidence: Evidence,
    ) -> bool {
        let id = peer.id();
        if self.is_self(&id) {
            return false;
        }

        let Some(entry) = self.entries.get_mut(&id) else {
            trace!(peer = %id, incarnation, "new member");
            self.entries.insert(
                id,
                MembershipEntry::new(peer.clone(), incarnation, MemberStatus::Alive),
            );
            self.buffer.push(id, RumorKind::New, incarnation);
            self.cycle.invalidate();
            return true;
        };

        let accepted = match (entry.status, evidence) {
            (MemberStatus::Dead, _) => false,
            (_, Evidence::Gossip) => incarnation > entry.incarnation,
            (_, Evidence::Direct) => incarnation >= entry.incarnation,
        };
        if !accepted {
            return false;
        }

        let was_suspected = entry.status == MemberStatus::Suspected;
        let newer_address = entry.refresh_address(peer);
        let changed = incarnation > entry.incarnation || was_suspected || newer_address;
        entry.incarnation = incarnation;
        entry.status = MemberStatus::Alive;

        if was_suspected {
            debug!(peer = %id, incarnation, "suspected member alive again");
        }
        if changed {
            self.buffer.push(id, RumorKind::New, incarnation);
        }
        changed
    }

    /// Record suspicion. `None` reuses the stored incarnation (local probe
    /// timeout) and only applies to known live peers.
    ///
    /// Returns `true` on a transition into Suspected (or a higher suspected
    /// incarnation).
    pub fn record_suspected(
        &mut self,
        peer: &PeerAddress,
        incarnation: Option<Incarnation>,
    ) -> bool {
        let id = peer.id();
        if self.is_self(&id) {
            return false;
        }

        let Some(entry) = self.entries.get_mut(&id) else {
            let Some(incarnation) = incarnation else {
                return false;
            };
            debug!(peer = %id, incarnation, "member suspected on first mention");
            self.entries.insert(
                id,
                MembershipEntry::new(peer.clone(), incarnation, MemberStatus::Suspected),
            );
            self.buffer.push(id, RumorKind::Suspected, incarnation);
            self.cycle.invalidate();
            return true;
        };

        if entry.status == MemberStatus::Dead {
            return false;
        }
        let incarnation = incarnation.unwrap_or(entry.incarnation);
        if incarnation < entry.incarnation {
            return false;
        }

        let fresh = entry.status != MemberStatus::Suspected || incarnation > entry.incarnation;
        entry.refresh_address(peer);
        entry.incarnation = incarnation;
        entry.status = MemberStatus::Suspected;

        if fresh {
            debug!(peer = %id, incarnation, "member suspected");
            self.buffer.push(id, RumorKind::Suspected, incarnation);
        }
        fresh
    }

    /// Record death. With an incarnation this is unconditional; with `None`
    /// it only succeeds for a currently suspected peer.
    ///
    /// Returns `true` if the peer transitioned into Dead.
    pub fn record_dead(&mut self, peer: &PeerAddress, incarnation: Option<Incarnation>) -> bool {
        let id = peer.id();
        if self.is_self(&id) {
            return false;
        }

        match (self.entries.get_mut(&id), incarnation) {
            (Some(entry), _) if entry.status == MemberStatus::Dead => false,
            (Some(entry), None) if entry.status != MemberStatus::Suspected => false,
            (Some(entry), incarnation) => {
                entry.refresh_address(peer);
                entry.incarnation = incarnation.unwrap_or(entry.incarnation);
                entry.status = MemberStatus::Dead;
                self.buffer.push(id, RumorKind::Dead, entry.incarnation);
                true
            }
            (None, Some(incarnation)) => {
                self.entries.insert(
                    id,
                    MembershipEntry::new(peer.clone(), incarnation, MemberStatus::Dead),
                );
                self.buffer.push(id, RumorKind::Dead, incarnation);
                true
            }
            (None, None) => false,
        }
    }

    /// Queue our own address for dissemination, e.g. after a parent change.
    pub fn announce_self(&mut self, incarnation: Incarnation) {
        let id = self.self_address.id();
        self.buffer.push(id, RumorKind::New, incarnation);
    }

    /// Next peer to probe, round-robin over a shuffled cycle of live peers.
    pub fn select_probe_target(&mut self) -> Option<PeerAddress> {
        let id = self.cycle.next_target(&mut self.rng, &self.entries)?;
        self.entries.get(&id).map(|entry| entry.address.clone())
    }

    /// Build a pong carrying the least-propagated gossip.
    pub fn build_piggyback(&mut self, ping_nr: PingNr, self_incarnation: Incarnation) -> Pong {
        let limit = retransmit_limit(self.config.lambda, self.live_count());
        let selected = self.buffer.select(self.config.max_message_size, limit);

        let mut pong = Pong {
            ping_nr,
            incarnation: self_incarnation,
            ..Default::default()
        };
        for (peer, record) in selected {
            let address = if self.is_self(&peer) {
                self.self_address.clone()
            } else {
                match self.entries.get(&peer) {
                    Some(entry) => entry.address.clone(),
                    None => continue,
                }
            };
            let rumor = Rumor::new(address, record.incarnation);
            match record.kind {
                RumorKind::New => pong.new_nodes.push(rumor),
                RumorKind::Suspected => pong.suspected_nodes.push(rumor),
                RumorKind::Dead => pong.dead_nodes.push(rumor),
            }
        }
        pong
    }

    /// Up to `k` random Alive peers other than `exclude`.
    pub fn random_alive(&mut self, k: usize, exclude: &NodeAddr) -> Vec<PeerAddress> {
        self.entries
            .values()
            .filter(|entry| entry.status == MemberStatus::Alive && entry.address.id() != *exclude)
            .map(|entry| entry.address.clone())
            .choose_multiple(&mut self.rng, k)
    }

    pub fn get(&self, peer: &NodeAddr) -> Option<&MembershipEntry> {
        self.entries.get(peer)
    }

    pub fn status_of(&self, peer: &NodeAddr) -> Option<MemberStatus> {
        self.entries.get(peer).map(|entry| entry.status)
    }

    /// Addresses of every alive or suspected peer.
    pub fn live_members(&self) -> Vec<PeerAddress> {
        self.entries
            .values()
            .filter(|entry| entry.is_live())
            .map(|entry| entry.address.clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.is_live()).count()
    }

    pub fn alive(&self) -> BTreeMap<NodeAddr, Incarnation> {
        self.snapshot(MemberStatus::Alive)
    }

    pub fn suspected(&self) -> BTreeMap<NodeAddr, Incarnation> {
        self.snapshot(MemberStatus::Suspected)
    }

    pub fn dead(&self) -> BTreeMap<NodeAddr, Incarnation> {
        self.snapshot(MemberStatus::Dead)
    }

    fn snapshot(&self, status: MemberStatus) -> BTreeMap<NodeAddr, Incarnation> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.status == status)
            .map(|(peer, entry)| (*peer, entry.incarnation))
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &MembershipEntry> {
        self.entries.values()
    }

    pub fn send_buffer(&self) -> &SendBuffer {
        &self.buffer
    }
}
