//! Network model: latency, loss, dead links and disconnected nodes.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use swim_types::NodeAddr;

/// Decides whether and when a message crosses the simulated network.
///
/// Latency is uniform in `[min_latency, max_latency]`. A message is dropped
/// when its directed link is dead, when either end is disconnected, or at
/// random with probability `loss`.
#[derive(Debug, Clone)]
pub struct NetworkModel {
    min_latency: Duration,
    max_latency: Duration,
    loss: f64,
    dead_links: BTreeSet<(NodeAddr, NodeAddr)>,
    disconnected: BTreeSet<NodeAddr>,
}

impl NetworkModel {
    pub fn new(min_latency: Duration, max_latency: Duration, loss: f64) -> Self {
        Self {
            min_latency,
            max_latency,
            loss,
            dead_links: BTreeSet::new(),
            disconnected: BTreeSet::new(),
        }
    }

    /// Drop everything `from` sends to `to`. The reverse direction is
    /// unaffected.
    pub fn kill_link(&mut self, from: NodeAddr, to: NodeAddr) {
        self.dead_links.insert((from, to));
    }

    pub fn restore_link(&mut self, from: NodeAddr, to: NodeAddr) {
        self.dead_links.remove(&(from, to));
    }

    /// Cut `node` off entirely: it can neither send nor receive.
    pub fn disconnect(&mut self, node: NodeAddr) {
        self.disconnected.insert(node);
    }

    pub fn reconnect(&mut self, node: NodeAddr) {
        self.disconnected.remove(&node);
    }

    pub fn is_disconnected(&self, node: &NodeAddr) -> bool {
        self.disconnected.contains(node)
    }

    pub fn dead_links(&self) -> &BTreeSet<(NodeAddr, NodeAddr)> {
        &self.dead_links
    }

    pub fn disconnected(&self) -> &BTreeSet<NodeAddr> {
        &self.disconnected
    }

    /// Latency for one message from `from` to `to`, or `None` if it is lost.
    pub fn transit(&self, rng: &mut impl Rng, from: NodeAddr, to: NodeAddr) -> Option<Duration> {
        if self.dead_links.contains(&(from, to))
            || self.disconnected.contains(&from)
            || self.disconnected.contains(&to)
        {
            return None;
        }
        if self.loss > 0.0 && rng.gen_bool(self.loss) {
            return None;
        }
        Some(rng.gen_range(self.min_latency..=self.max_latency))
    }
}
