//! Simulation events for later inspection.

use serde::{Deserialize, Serialize};
use swim_types::{Incarnation, NodeAddr};

/// Events recorded while a simulation runs. `time` is in simulated
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SimEvent {
    /// A node joined and started its engines
    NodeStarted { node: NodeAddr, open: bool, time: u64 },

    /// A node was killed by the scenario
    NodeKilled { node: NodeAddr, time: u64 },

    /// A node hit a relay invariant violation and stopped
    NodeCrashed {
        node: NodeAddr,
        error: String,
        time: u64,
    },

    /// A message could not be routed (NAT'd destination without parents)
    SendFailed {
        node: NodeAddr,
        error: String,
        time: u64,
    },

    /// A node declared one of its peers dead
    PeerDeclaredDead {
        node: NodeAddr,
        peer: NodeAddr,
        incarnation: Incarnation,
        time: u64,
    },

    /// A NAT'd node's parent set changed
    ParentsChanged {
        node: NodeAddr,
        parents: Vec<NodeAddr>,
        time: u64,
    },
}

impl SimEvent {
    /// Get the simulated time of this event.
    pub fn time(&self) -> u64 {
        match self {
            SimEvent::NodeStarted { time, .. } => *time,
            SimEvent::NodeKilled { time, .. } => *time,
            SimEvent::NodeCrashed { time, .. } => *time,
            SimEvent::SendFailed { time, .. } => *time,
            SimEvent::PeerDeclaredDead { time, .. } => *time,
            SimEvent::ParentsChanged { time, .. } => *time,
        }
    }

    /// The node the event happened at.
    pub fn node(&self) -> NodeAddr {
        match self {
            SimEvent::NodeStarted { node, .. }
            | SimEvent::NodeKilled { node, .. }
            | SimEvent::NodeCrashed { node, .. }
            | SimEvent::SendFailed { node, .. }
            | SimEvent::PeerDeclaredDead { node, .. }
            | SimEvent::ParentsChanged { node, .. } => *node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SimEvent::NodeKilled {
            node: NodeAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12345, 10),
            time: 2500,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "NodeKilled");
        assert_eq!(json["time"], 2500);
        assert_eq!(event.time(), 2500);
    }
}
