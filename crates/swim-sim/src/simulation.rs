//! Deterministic discrete-event simulation of many hosts.
//!
//! One queue holds every future action (message deliveries, fired timers,
//! peer samples, scheduled kills) ordered by simulated time and insertion
//! order. Each action runs one host handler to completion, so per-node
//! execution stays single-threaded while nodes interleave freely. The same
//! seed always replays the same run.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use swim_node::{Host, HostEffect, HostTimer, StatusReporter};
use swim_types::{Envelope, NodeAddr, PeerAddress, Sample};
use tracing::{debug, info, trace, warn};

use crate::aggregator::Aggregator;
use crate::config::SimulationConfig;
use crate::error::{Error, Result};
use crate::events::SimEvent;
use crate::network::NetworkModel;

#[derive(Debug)]
enum Action {
    Deliver { to: NodeAddr, envelope: Envelope },
    Timer { node: NodeAddr, timer: HostTimer },
    Sample { node: NodeAddr },
    Kill { node: NodeAddr },
}

#[derive(Debug)]
struct Scheduled {
    at: u64,
    seq: u64,
    action: Action,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.seq) == (other.at, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap, the earliest action pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

/// Simulates a group of SWIM hosts over a [`NetworkModel`].
pub struct Simulation {
    config: SimulationConfig,
    rng: StdRng,
    network: NetworkModel,
    aggregator: Aggregator,
    nodes: BTreeMap<NodeAddr, Host>,
    stopped: BTreeMap<NodeAddr, Host>,
    pending_timers: HashSet<(NodeAddr, HostTimer)>,
    queue: BinaryHeap<Scheduled>,
    next_seq: u64,
    now: u64,
    events: Vec<SimEvent>,
}

impl Simulation {
    /// Create a new simulation with the given configuration.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let network = NetworkModel::new(config.min_latency, config.max_latency, config.loss);
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            network,
            aggregator: Aggregator::new(),
            nodes: BTreeMap::new(),
            stopped: BTreeMap::new(),
            pending_timers: HashSet::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            now: 0,
            events: Vec::new(),
            config,
        })
    }

    /// Start a node now. Engine seeds derive from the simulation seed and the
    /// node id.
    pub fn add_node(
        &mut self,
        address: PeerAddress,
        bootstrap: impl IntoIterator<Item = PeerAddress>,
    ) -> Result<NodeAddr> {
        let id = address.id();
        if self.nodes.contains_key(&id) || self.stopped.contains_key(&id) {
            return Err(Error::DuplicateNode(id));
        }

        let seed = self.config.seed ^ (u64::from(id.id) << 1);
        let detector = self.config.detector.clone().with_seed(seed);
        let relay = self.config.relay.clone().with_seed(seed.wrapping_add(1));
        let open = address.is_open();
        let host = Host::new(address, bootstrap, detector, relay)?;

        self.nodes.insert(id, host);
        self.events.push(SimEvent::NodeStarted {
            node: id,
            open,
            time: self.now,
        });
        debug!(node = %id, open, time = self.now, "node started");

        if let Some(host) = self.nodes.get_mut(&id) {
            let outcome = host.start();
            self.settle(id, outcome);
        }
        self.push(self.config.sample_interval, Action::Sample { node: id });
        Ok(id)
    }

    /// Crash `node` immediately. Its timers die with it and messages to it
    /// are dropped.
    pub fn kill(&mut self, node: &NodeAddr) -> bool {
        let Some(host) = self.nodes.remove(node) else {
            return false;
        };
        info!(node = %node, time = self.now, "killing node");
        self.pending_timers.retain(|(owner, _)| owner != node);
        self.stopped.insert(*node, host);
        self.events.push(SimEvent::NodeKilled {
            node: *node,
            time: self.now,
        });
        true
    }

    /// Crash `node` once `after` has elapsed.
    pub fn schedule_kill(&mut self, node: NodeAddr, after: Duration) {
        self.push(after, Action::Kill { node });
    }

    /// Deliver a hand-built envelope to `to` after `after`, bypassing the
    /// network model.
    pub fn inject(&mut self, to: NodeAddr, envelope: Envelope, after: Duration) {
        self.push(after, Action::Deliver { to, envelope });
    }

    /// Process every action due within the next `duration`.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now.saturating_add(millis(duration));
        while self.queue.peek().is_some_and(|next| next.at <= end) {
            let Some(Scheduled { at, action, .. }) = self.queue.pop() else {
                break;
            };
            self.now = at;
            self.dispatch(action);
        }
        self.now = end;
    }

    /// Simulated time elapsed since the start.
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.now)
    }

    pub fn host(&self, node: &NodeAddr) -> Option<&Host> {
        self.nodes.get(node)
    }

    /// Last state of a killed or crashed node.
    pub fn stopped_host(&self, node: &NodeAddr) -> Option<&Host> {
        self.stopped.get(node)
    }

    pub fn is_running(&self, node: &NodeAddr) -> bool {
        self.nodes.contains_key(node)
    }

    /// Running nodes, in identity order.
    pub fn running(&self) -> impl Iterator<Item = (&NodeAddr, &Host)> {
        self.nodes.iter()
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn network(&self) -> &NetworkModel {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut NetworkModel {
        &mut self.network
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn push(&mut self, after: Duration, action: Action) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled {
            at: self.now.saturating_add(millis(after)),
            seq,
            action,
        });
    }

    fn dispatch(&mut self, action: Action) {
        match action {
            Action::Deliver { to, envelope } => {
                let Some(host) = self.nodes.get_mut(&to) else {
                    trace!(node = %to, "message for stopped node dropped");
                    return;
                };
                let outcome = host.receive(envelope);
                self.settle(to, outcome);
            }
            Action::Timer { node, timer } => {
                if !self.pending_timers.remove(&(node, timer)) {
                    return;
                }
                let Some(host) = self.nodes.get_mut(&node) else {
                    return;
                };
                let outcome = host.fire(timer);
                self.settle(node, outcome);
            }
            Action::Sample { node } => {
                if !self.nodes.contains_key(&node) {
                    return;
                }
                let sample = self.sample_for(&node);
                if let Some(host) = self.nodes.get_mut(&node) {
                    let outcome = host.on_sample(sample);
                    self.settle(node, outcome);
                }
                self.push(self.config.sample_interval, Action::Sample { node });
            }
            Action::Kill { node } => {
                self.kill(&node);
            }
        }
    }

    /// Random open running peers, standing in for a peer-sampling service.
    fn sample_for(&mut self, node: &NodeAddr) -> Sample {
        let candidates: Vec<PeerAddress> = self
            .nodes
            .iter()
            .filter(|(id, host)| *id != node && host.self_address().is_open())
            .map(|(_, host)| host.self_address().clone())
            .collect();
        let peers = candidates
            .choose_multiple(&mut self.rng, self.config.sample_size)
            .cloned()
            .collect();
        Sample::new(peers)
    }

    /// Apply a handler outcome and the effects it left behind.
    fn settle(&mut self, node: NodeAddr, outcome: swim_node::Result<()>) {
        if let Err(e) = outcome {
            if e.is_fatal() {
                warn!(node = %node, error = %e, time = self.now, "node crashed");
                self.events.push(SimEvent::NodeCrashed {
                    node,
                    error: e.to_string(),
                    time: self.now,
                });
                self.kill_crashed(&node);
                return;
            }
            self.events.push(SimEvent::SendFailed {
                node,
                error: e.to_string(),
                time: self.now,
            });
        }

        let effects = match self.nodes.get_mut(&node) {
            Some(host) => host.take_effects(),
            None => return,
        };

        for effect in effects {
            match effect {
                HostEffect::Transmit(envelope) => {
                    let to = envelope.next_hop();
                    match self.network.transit(&mut self.rng, node, to) {
                        Some(latency) => self.push(latency, Action::Deliver { to, envelope }),
                        None => trace!(from = %node, %to, "message lost"),
                    }
                }
                HostEffect::Schedule { timer, after } => {
                    self.pending_timers.insert((node, timer));
                    self.push(after, Action::Timer { node, timer });
                }
                HostEffect::Cancel { timer } => {
                    self.pending_timers.remove(&(node, timer));
                }
                HostEffect::Report(status) => self.aggregator.submit(node, status),
                HostEffect::PeerDead { peer, incarnation } => {
                    self.events.push(SimEvent::PeerDeclaredDead {
                        node,
                        peer: peer.id(),
                        incarnation,
                        time: self.now,
                    });
                }
                HostEffect::ParentsChanged(parents) => {
                    self.events.push(SimEvent::ParentsChanged {
                        node,
                        parents: parents.iter().copied().collect(),
                        time: self.now,
                    });
                }
            }
        }
    }

    fn kill_crashed(&mut self, node: &NodeAddr) {
        if let Some(mut host) = self.nodes.remove(node) {
            // Drop whatever the failed handler left behind.
            host.take_effects();
            self.stopped.insert(*node, host);
        }
        self.pending_timers.retain(|(owner, _)| owner != node);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use swim_types::{Header, ParentSet, RelayHeader, Route, SwimMessage};

    fn node(id: u32) -> NodeAddr {
        NodeAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12345, id)
    }

    fn open(id: u32) -> PeerAddress {
        PeerAddress::open(node(id))
    }

    fn quiet_config() -> SimulationConfig {
        SimulationConfig::default().with_latency(Duration::from_millis(10), Duration::from_millis(50))
    }

    #[test]
    fn simulation_starts_empty() {
        let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
        sim.run_for(Duration::from_secs(5));
        assert_eq!(sim.running().count(), 0);
        assert!(sim.events().is_empty());
        assert_eq!(sim.now(), Duration::from_secs(5));
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        sim.add_node(open(10), []).unwrap();
        assert!(matches!(
            sim.add_node(open(10), []),
            Err(Error::DuplicateNode(_))
        ));
    }

    #[test]
    fn two_nodes_learn_each_other() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        sim.add_node(open(10), []).unwrap();
        sim.add_node(open(11), [open(10)]).unwrap();
        sim.run_for(Duration::from_secs(5));

        let first = sim.host(&node(10)).unwrap();
        assert!(first.detector().directory().alive().contains_key(&node(11)));
        assert!(sim.aggregator().round_count() >= 4);
    }

    #[test]
    fn same_seed_replays_the_same_run() {
        let run = || {
            let mut sim = Simulation::new(SimulationConfig::default().with_seed(7)).unwrap();
            sim.add_node(open(10), []).unwrap();
            for id in 11..16 {
                sim.add_node(open(id), [open(10)]).unwrap();
            }
            sim.run_for(Duration::from_secs(10));
            sim.aggregator().report()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn killed_node_is_declared_dead() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        sim.add_node(open(10), []).unwrap();
        sim.add_node(open(11), [open(10)]).unwrap();
        sim.add_node(open(12), [open(10), open(11)]).unwrap();
        sim.run_for(Duration::from_secs(3));

        assert!(sim.kill(&node(12)));
        assert!(!sim.kill(&node(12)));
        sim.run_for(Duration::from_secs(20));

        for survivor in [node(10), node(11)] {
            let view = sim.host(&survivor).unwrap().detector().directory();
            assert!(view.dead().contains_key(&node(12)), "{survivor} missed the death");
        }
        assert!(sim.events().iter().any(|e| matches!(
            e,
            SimEvent::PeerDeclaredDead { peer, .. } if *peer == node(12)
        )));
    }

    #[test]
    fn relay_header_at_open_node_crashes_it() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        sim.add_node(open(10), []).unwrap();

        let child = PeerAddress::nated(node(20), ParentSet::new([node(10)]));
        let envelope = Envelope {
            route: Route::Relay(RelayHeader {
                actual_source: open(30),
                inner: Header::new(open(30), child),
            }),
            payload: SwimMessage::Alive { incarnation: 1 }.into(),
        };
        sim.inject(node(10), envelope, Duration::from_millis(5));
        sim.run_for(Duration::from_millis(10));

        assert!(!sim.is_running(&node(10)));
        assert!(sim.stopped_host(&node(10)).is_some());
        assert!(matches!(
            sim.events().last(),
            Some(SimEvent::NodeCrashed { node: n, .. }) if *n == node(10)
        ));
    }
}
