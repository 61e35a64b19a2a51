//! Round-robin probe order over a shuffled cycle of live peers.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use swim_types::NodeAddr;

use crate::entry::MembershipEntry;

/// Shuffled probe order.
///
/// The order is rebuilt when it is exhausted or after a new peer joined, so
/// every live peer is probed once per cycle.
#[derive(Debug, Clone, Default)]
pub struct ProbeCycle {
    order: Vec<NodeAddr>,
    cursor: usize,
    stale: bool,
}

impl ProbeCycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a reshuffle on the next selection.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Next live peer, or `None` if there are no live peers.
    pub fn next_target<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        entries: &BTreeMap<NodeAddr, MembershipEntry>,
    ) -> Option<NodeAddr> {
        // A fresh cycle only holds live peers, so the second pass always
        // succeeds unless there are none.
        for _ in 0..2 {
            if self.stale || self.cursor >= self.order.len() {
                self.rebuild(rng, entries);
            }
            while self.cursor < self.order.len() {
                let candidate = self.order[self.cursor];
                self.cursor += 1;
                if entries.get(&candidate).is_some_and(MembershipEntry::is_live) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn rebuild<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        entries: &BTreeMap<NodeAddr, MembershipEntry>,
    ) {
        self.order = entries
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(peer, _)| *peer)
            .collect();
        self.order.shuffle(rng);
        self.cursor = 0;
        self.stale = false;
    }
}
