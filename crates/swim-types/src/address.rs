//! Node identity and reachability.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Stable identity of a node.
///
/// Two addresses denote the same node iff `ip`, `port` and `id` match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddr {
    pub ip: IpAddr,
    pub port: u16,
    pub id: u32,
}

impl NodeAddr {
    /// Create a new node address.
    pub const fn new(ip: IpAddr, port: u16, id: u32) -> Self {
        Self { ip, port, id }
    }

    /// The socket address this node listens on.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.socket_addr())
    }
}

impl FromStr for NodeAddr {
    type Err = Error;

    /// Parse `id@ip:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidNodeAddr(s.to_string());
        let (id, socket) = s.trim().split_once('@').ok_or_else(invalid)?;
        let id = id.parse::<u32>().map_err(|_| invalid())?;
        let socket = socket.parse::<SocketAddr>().map_err(|_| invalid())?;
        Ok(Self::new(socket.ip(), socket.port(), id))
    }
}

/// The relay parents of a NAT'd node.
///
/// Every change bumps `version`, so receivers can tell a fresher parent set
/// from a stale one without comparing contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSet {
    version: u64,
    parents: BTreeSet<NodeAddr>,
}

impl ParentSet {
    /// Create an initial (version 0) parent set.
    pub fn new(parents: impl IntoIterator<Item = NodeAddr>) -> Self {
        Self {
            version: 0,
            parents: parents.into_iter().collect(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn contains(&self, addr: &NodeAddr) -> bool {
        self.parents.contains(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeAddr> {
        self.parents.iter()
    }

    /// Borrow the underlying set.
    pub fn members(&self) -> &BTreeSet<NodeAddr> {
        &self.parents
    }

    /// Replace the parents. Returns `true` (and bumps the version) only if
    /// the membership actually changed.
    pub fn replace(&mut self, parents: BTreeSet<NodeAddr>) -> bool {
        if parents == self.parents {
            return false;
        }
        self.parents = parents;
        self.version += 1;
        true
    }
}

/// How a peer can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reachability {
    /// Publicly reachable.
    Open,
    /// Reachable only through one of its parents.
    Nated(ParentSet),
}

/// Identity plus reachability of a peer.
///
/// Not hashable on purpose: key maps by [`PeerAddress::id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    addr: NodeAddr,
    reachability: Reachability,
}

impl PeerAddress {
    /// An open (publicly reachable) peer.
    pub const fn open(addr: NodeAddr) -> Self {
        Self {
            addr,
            reachability: Reachability::Open,
        }
    }

    /// A NAT'd peer reachable through `parents`.
    pub fn nated(addr: NodeAddr, parents: ParentSet) -> Self {
        Self {
            addr,
            reachability: Reachability::Nated(parents),
        }
    }

    /// Identity of this peer.
    pub fn id(&self) -> NodeAddr {
        self.addr
    }

    pub fn reachability(&self) -> &Reachability {
        &self.reachability
    }

    pub fn is_open(&self) -> bool {
        matches!(self.reachability, Reachability::Open)
    }

    /// Parent set, if this peer is NAT'd.
    pub fn parents(&self) -> Option<&ParentSet> {
        match &self.reachability {
            Reachability::Open => None,
            Reachability::Nated(parents) => Some(parents),
        }
    }

    /// Mutable parent set, if this peer is NAT'd.
    pub fn parents_mut(&mut self) -> Option<&mut ParentSet> {
        match &mut self.reachability {
            Reachability::Open => None,
            Reachability::Nated(parents) => Some(parents),
        }
    }

    /// Version of the parent set (0 for open peers).
    pub fn parent_version(&self) -> u64 {
        self.parents().map_or(0, ParentSet::version)
    }

    /// Whether both addresses denote the same node, regardless of parents.
    pub fn same_node(&self, other: &PeerAddress) -> bool {
        self.addr == other.addr
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reachability {
            Reachability::Open => write!(f, "{}", self.addr),
            Reachability::Nated(parents) => {
                write!(f, "{} (nat v{}, {} parents)", self.addr, parents.version(), parents.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(id: u32) -> NodeAddr {
        NodeAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12345, id)
    }

    #[test]
    fn node_addr_parses_and_displays() {
        let parsed: NodeAddr = "7@127.0.0.1:12345".parse().unwrap();
        assert_eq!(parsed, addr(7));
        assert_eq!(parsed.to_string(), "7@127.0.0.1:12345");
    }

    #[test]
    fn node_addr_rejects_garbage() {
        assert!("127.0.0.1:12345".parse::<NodeAddr>().is_err());
        assert!("x@127.0.0.1:1".parse::<NodeAddr>().is_err());
        assert!("1@nowhere".parse::<NodeAddr>().is_err());
    }

    #[test]
    fn parent_set_version_bumps_only_on_change() {
        let mut parents = ParentSet::new([addr(1), addr(2)]);
        assert_eq!(parents.version(), 0);

        assert!(!parents.replace([addr(2), addr(1)].into_iter().collect()));
        assert_eq!(parents.version(), 0);

        assert!(parents.replace([addr(1), addr(3)].into_iter().collect()));
        assert_eq!(parents.version(), 1);
        assert!(parents.contains(&addr(3)));
        assert!(!parents.contains(&addr(2)));
    }

    #[test]
    fn identity_ignores_parent_set() {
        let a = PeerAddress::nated(addr(5), ParentSet::new([addr(1)]));
        let mut b = a.clone();
        b.parents_mut()
            .unwrap()
            .replace([addr(2)].into_iter().collect());

        assert!(a.same_node(&b));
        assert_eq!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(b.parent_version(), 1);
    }

    #[test]
    fn open_peer_has_no_parents() {
        let mut open = PeerAddress::open(addr(1));
        assert!(open.is_open());
        assert!(open.parents().is_none());
        assert!(open.parents_mut().is_none());
        assert_eq!(open.parent_version(), 0);
    }
}
