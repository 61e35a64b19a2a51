//! Protocol messages and relay envelopes.

use serde::{Deserialize, Serialize};

use crate::address::{NodeAddr, PeerAddress};

/// Per-node probe sequence number. Never reused.
pub type PingNr = u64;

/// Incarnation counter a node raises on itself to refute suspicion.
pub type Incarnation = u64;

/// One piggybacked membership record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rumor {
    pub peer: PeerAddress,
    pub incarnation: Incarnation,
}

impl Rumor {
    pub fn new(peer: PeerAddress, incarnation: Incarnation) -> Self {
        Self { peer, incarnation }
    }
}

/// Reply to a [`SwimMessage::Ping`], carrying gossip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub ping_nr: PingNr,
    /// Incarnation of the responder.
    pub incarnation: Incarnation,
    pub new_nodes: Vec<Rumor>,
    pub suspected_nodes: Vec<Rumor>,
    pub dead_nodes: Vec<Rumor>,
}

impl Pong {
    /// Whether `node` appears in the suspected gossip.
    pub fn suspects(&self, node: &NodeAddr) -> bool {
        self.suspected_nodes.iter().any(|r| r.peer.id() == *node)
    }

    /// Total number of piggybacked records.
    pub fn rumor_count(&self) -> usize {
        self.new_nodes.len() + self.suspected_nodes.len() + self.dead_nodes.len()
    }
}

/// Failure detector messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwimMessage {
    Ping {
        ping_nr: PingNr,
        incarnation: Incarnation,
    },
    Pong(Pong),
    /// Refutation broadcast.
    Alive { incarnation: Incarnation },
    /// Ask the receiver to probe `target` on the sender's behalf.
    KPing {
        target: PeerAddress,
        outer_ping_nr: PingNr,
    },
    /// Indirect probe succeeded: `subject` answered.
    KPong {
        subject: PeerAddress,
        incarnation: Incarnation,
        outer_ping_nr: PingNr,
    },
}

impl SwimMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SwimMessage::Ping { .. } => "ping",
            SwimMessage::Pong(_) => "pong",
            SwimMessage::Alive { .. } => "alive",
            SwimMessage::KPing { .. } => "kping",
            SwimMessage::KPong { .. } => "kpong",
        }
    }
}

/// Parent heartbeat messages, exchanged only between a NAT'd node and its
/// parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NatMessage {
    NatPing { ping_nr: PingNr },
    NatPong { ping_nr: PingNr },
}

/// Anything a node can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Swim(SwimMessage),
    Nat(NatMessage),
}

impl From<SwimMessage> for Payload {
    fn from(msg: SwimMessage) -> Self {
        Payload::Swim(msg)
    }
}

impl From<NatMessage> for Payload {
    fn from(msg: NatMessage) -> Self {
        Payload::Nat(msg)
    }
}

/// Logical source and destination of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub source: PeerAddress,
    pub destination: PeerAddress,
}

impl Header {
    pub fn new(source: PeerAddress, destination: PeerAddress) -> Self {
        Self {
            source,
            destination,
        }
    }
}

/// A request to `parent` to relay `inner` to its NAT'd destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHeader {
    pub inner: Header,
    pub parent: NodeAddr,
}

impl SourceHeader {
    /// The header a parent forwards to the NAT'd destination.
    pub fn into_relay(self) -> RelayHeader {
        RelayHeader {
            actual_source: self.inner.source.clone(),
            inner: self.inner,
        }
    }
}

/// A relayed message as seen by the NAT'd destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayHeader {
    pub actual_source: PeerAddress,
    pub inner: Header,
}

/// How an envelope travels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    Direct(Header),
    Source(SourceHeader),
    Relay(RelayHeader),
}

impl Route {
    /// The node this envelope must physically be sent to.
    pub fn next_hop(&self) -> NodeAddr {
        match self {
            Route::Direct(header) => header.destination.id(),
            Route::Source(source) => source.parent,
            Route::Relay(relay) => relay.inner.destination.id(),
        }
    }
}

/// One datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub route: Route,
    pub payload: Payload,
}

impl Envelope {
    /// An unwrapped envelope sent straight to the destination.
    pub fn direct(
        source: PeerAddress,
        destination: PeerAddress,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            route: Route::Direct(Header::new(source, destination)),
            payload: payload.into(),
        }
    }

    pub fn next_hop(&self) -> NodeAddr {
        self.route.next_hop()
    }
}
