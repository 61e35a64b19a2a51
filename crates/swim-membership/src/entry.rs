//! Per-peer membership state.

use std::fmt;

use swim_types::{Incarnation, PeerAddress};

/// Status of a known peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberStatus {
    Alive,
    Suspected,
    /// Terminal. The entry stays as a tombstone.
    Dead,
}

impl MemberStatus {
    /// Alive or suspected peers are still probed.
    pub fn is_live(self) -> bool {
        !matches!(self, MemberStatus::Dead)
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberStatus::Alive => write!(f, "Alive"),
            MemberStatus::Suspected => write!(f, "Suspected"),
            MemberStatus::Dead => write!(f, "Dead"),
        }
    }
}

/// What the directory knows about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEntry {
    /// Latest known address (identity plus parent set).
    pub address: PeerAddress,
    pub incarnation: Incarnation,
    pub status: MemberStatus,
}

impl MembershipEntry {
    pub fn new(address: PeerAddress, incarnation: Incarnation, status: MemberStatus) -> Self {
        Self {
            address,
            incarnation,
            status,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Adopt `address` if its parent set is at least as fresh as ours.
    pub(crate) fn refresh_address(&mut self, address: &PeerAddress) -> bool {
        if address.parent_version() < self.address.parent_version() {
            return false;
        }
        let newer = address.parent_version() > self.address.parent_version();
        self.address = address.clone();
        newer
    }
}
