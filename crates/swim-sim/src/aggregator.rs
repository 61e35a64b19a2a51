//! Status aggregation and convergence measurement.
//!
//! Every node reports a [`Status`] each status interval. Reports are grouped
//! into rounds by their status number. For one round:
//!
//! - each reporter counts itself as live;
//! - a reporter that sees no live peer besides itself is *disconnected*;
//! - *common* is the intersection of the connected reporters' live sets;
//! - *all* is the union of every reporter's live set.
//!
//! `rate = max(0, (|common| - disconnected) / max(1, |all|))`, inverted when
//! above 1. A round where everyone agrees on everyone has rate 1.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use swim_node::StatusReporter;
use swim_types::{NodeAddr, Status};
use tracing::trace;

use crate::error::Result;

/// Collects status reports. Owned by one simulation.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    rounds: BTreeMap<u64, BTreeMap<NodeAddr, Status>>,
}

/// Convergence of one status round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundConvergence {
    pub status_nr: u64,
    pub reporters: usize,
    pub common_live: usize,
    pub all_live: usize,
    pub disconnected: usize,
    pub rate: f64,
}

/// Convergence over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConvergenceReport {
    pub rounds: Vec<RoundConvergence>,
}

impl ConvergenceReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The last round reported by exactly `reporters` nodes.
    pub fn last_complete(&self, reporters: usize) -> Option<&RoundConvergence> {
        self.rounds.iter().rev().find(|r| r.reporters == reporters)
    }
}

impl StatusReporter for Aggregator {
    fn submit(&mut self, from: NodeAddr, status: Status) {
        trace!(node = %from, status_nr = status.status_nr, "status received");
        self.rounds
            .entry(status.status_nr)
            .or_default()
            .insert(from, status);
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// Convergence of a single round, if anything was reported for it.
    pub fn convergence(&self, status_nr: u64) -> Option<RoundConvergence> {
        let statuses = self.rounds.get(&status_nr)?;

        let mut all: BTreeSet<NodeAddr> = BTreeSet::new();
        let mut common: Option<BTreeSet<NodeAddr>> = None;
        let mut disconnected = 0;

        for (reporter, status) in statuses {
            let mut live: BTreeSet<NodeAddr> = status.live().copied().collect();
            if live.iter().all(|peer| peer == reporter) {
                disconnected += 1;
            }
            live.insert(*reporter);
            all.extend(live.iter().copied());

            if live.len() > 1 {
                common = Some(match common {
                    None => live,
                    Some(acc) => acc.intersection(&live).copied().collect(),
                });
            }
        }

        let common_live = common.map_or(0, |c| c.len());
        let mut rate = (common_live as f64 - disconnected as f64) / all.len().max(1) as f64;
        rate = rate.max(0.0);
        if rate > 1.0 {
            rate = 1.0 / rate;
        }

        Some(RoundConvergence {
            status_nr,
            reporters: statuses.len(),
            common_live,
            all_live: all.len(),
            disconnected,
            rate,
        })
    }

    /// Convergence for every round, in status number order.
    pub fn report(&self) -> ConvergenceReport {
        ConvergenceReport {
            rounds: self
                .rounds
                .keys()
                .filter_map(|nr| self.convergence(*nr))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn node(id: u32) -> NodeAddr {
        NodeAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12345, id)
    }

    fn status(nr: u64, alive: &[u32], suspected: &[u32]) -> Status {
        Status {
            status_nr: nr,
            alive: alive.iter().map(|id| (node(*id), 0)).collect(),
            suspected: suspected.iter().map(|id| (node(*id), 0)).collect(),
            ..Status::default()
        }
    }

    #[test]
    fn full_agreement_converges() {
        let mut agg = Aggregator::new();
        agg.submit(node(1), status(0, &[2, 3], &[]));
        agg.submit(node(2), status(0, &[1, 3], &[]));
        agg.submit(node(3), status(0, &[1], &[2]));

        let round = agg.convergence(0).unwrap();
        assert_eq!(round.reporters, 3);
        assert_eq!(round.common_live, 3);
        assert_eq!(round.all_live, 3);
        assert_eq!(round.rate, 1.0);
    }

    #[test]
    fn partial_views_lower_the_rate() {
        let mut agg = Aggregator::new();
        agg.submit(node(1), status(4, &[2], &[]));
        agg.submit(node(2), status(4, &[1, 3], &[]));
        agg.submit(node(3), status(4, &[2], &[]));

        // common = {2}, all = {1, 2, 3}
        let round = agg.convergence(4).unwrap();
        assert_eq!(round.common_live, 1);
        assert_eq!(round.all_live, 3);
        assert!((round.rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn disconnected_reporters_count_against_convergence() {
        let mut agg = Aggregator::new();
        agg.submit(node(1), status(1, &[2], &[]));
        agg.submit(node(2), status(1, &[1], &[]));
        agg.submit(node(3), status(1, &[], &[]));

        let round = agg.convergence(1).unwrap();
        assert_eq!(round.disconnected, 1);
        assert_eq!(round.common_live, 2);
        assert!((round.rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn rate_never_negative() {
        let mut agg = Aggregator::new();
        agg.submit(node(1), status(2, &[], &[]));
        agg.submit(node(2), status(2, &[], &[]));

        let round = agg.convergence(2).unwrap();
        assert_eq!(round.common_live, 0);
        assert_eq!(round.rate, 0.0);
    }

    #[test]
    fn report_renders_every_round() {
        let mut agg = Aggregator::new();
        agg.submit(node(1), status(0, &[2], &[]));
        agg.submit(node(2), status(0, &[1], &[]));
        agg.submit(node(1), status(1, &[2], &[]));

        let report = agg.report();
        assert_eq!(report.rounds.len(), 2);
        assert_eq!(report.last_complete(2).map(|r| r.status_nr), Some(0));

        let json = report.to_json().unwrap();
        assert!(json.contains("\"status_nr\": 1"));
        assert!(agg.convergence(7).is_none());
    }
}
