//! Piggyback send buffer.
//!
//! Holds at most one record per peer. Records are handed out least-sent first
//! and evicted once they have been propagated more than
//! `⌈λ·max(1, ln(max(1, n)))⌉` times, where `n` is the number of live members.

use std::collections::BTreeMap;

use swim_types::{Incarnation, NodeAddr};

/// Which gossip list a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RumorKind {
    New,
    Suspected,
    Dead,
}

/// One pending piggyback record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedRumor {
    pub kind: RumorKind,
    pub incarnation: Incarnation,
    /// Times this record has been piggybacked.
    pub propagation_count: u32,
}

/// Retransmission limit for a cluster with `live` members.
pub fn retransmit_limit(lambda: f64, live: usize) -> u32 {
    let n = live.max(1) as f64;
    let limit = lambda * n.ln().max(1.0);
    limit.ceil() as u32
}

/// Pending gossip, one record per peer.
#[derive(Debug, Clone, Default)]
pub struct SendBuffer {
    records: BTreeMap<NodeAddr, BufferedRumor>,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the peer's record with a fresh one.
    pub fn push(&mut self, peer: NodeAddr, kind: RumorKind, incarnation: Incarnation) {
        self.records.insert(
            peer,
            BufferedRumor {
                kind,
                incarnation,
                propagation_count: 0,
            },
        );
    }

    pub fn get(&self, peer: &NodeAddr) -> Option<&BufferedRumor> {
        self.records.get(peer)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take up to `max` records, least propagated first (ties by address).
    ///
    /// Each selected record's count is incremented; records whose count then
    /// exceeds `limit` are evicted. Returned records carry the new count.
    pub fn select(&mut self, max: usize, limit: u32) -> Vec<(NodeAddr, BufferedRumor)> {
        let mut order: Vec<(u32, NodeAddr)> = self
            .records
            .iter()
            .map(|(peer, record)| (record.propagation_count, *peer))
            .collect();
        order.sort_unstable();

        let mut selected = Vec::with_capacity(order.len().min(max));
        for (_, peer) in order.into_iter().take(max) {
            let Some(record) = self.records.get_mut(&peer) else {
                continue;
            };
            record.propagation_count += 1;
            let record = *record;
            if record.propagation_count > limit {
                self.records.remove(&peer);
            }
            selected.push((peer, record));
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(id: u32) -> NodeAddr {
        NodeAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12345, id)
    }

    #[test]
    fn limit_grows_logarithmically() {
        assert_eq!(retransmit_limit(3.0, 0), 3);
        assert_eq!(retransmit_limit(3.0, 1), 3);
        assert_eq!(retransmit_limit(3.0, 2), 3);
        // ln(20) ~ 2.996
        assert_eq!(retransmit_limit(3.0, 20), 9);
        // ln(100) ~ 4.605
        assert_eq!(retransmit_limit(3.0, 100), 14);
    }

    #[test]
    fn least_sent_records_go_first() {
        let mut buffer = SendBuffer::new();
        buffer.push(addr(1), RumorKind::New, 0);
        buffer.push(addr(2), RumorKind::Suspected, 0);

        let first = buffer.select(1, 10);
        assert_eq!(first[0].0, addr(1));

        let second = buffer.select(1, 10);
        assert_eq!(second[0].0, addr(2));
        assert_eq!(second[0].1.kind, RumorKind::Suspected);
    }

    #[test]
    fn push_resets_the_count() {
        let mut buffer = SendBuffer::new();
        buffer.push(addr(1), RumorKind::New, 0);
        buffer.select(5, 10);
        buffer.select(5, 10);
        assert_eq!(buffer.get(&addr(1)).map(|r| r.propagation_count), Some(2));

        buffer.push(addr(1), RumorKind::Dead, 0);
        assert_eq!(buffer.get(&addr(1)).map(|r| r.propagation_count), Some(0));
    }

    #[test]
    fn evicted_after_exceeding_limit() {
        let mut buffer = SendBuffer::new();
        buffer.push(addr(1), RumorKind::New, 4);

        for round in 1..=3 {
            let out = buffer.select(10, 3);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].1.propagation_count, round);
            assert_eq!(buffer.len(), 1);
        }

        // Fourth propagation exceeds the limit of 3.
        assert_eq!(buffer.select(10, 3).len(), 1);
        assert!(buffer.is_empty());
        assert!(buffer.select(10, 3).is_empty());
    }
}
