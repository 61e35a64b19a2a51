//! Canned scenarios: boot a population, then kill nodes or links.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use swim_types::{NodeAddr, ParentSet, PeerAddress};
use tracing::info;

use crate::config::SimulationConfig;
use crate::error::{Error, Result};
use crate::simulation::Simulation;

/// First node id handed out.
pub const FIRST_NODE_ID: u32 = 10;
/// Port shared by every simulated node; identities differ by id.
pub const NODE_PORT: u16 = 12345;

/// What to build and what to break.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub node_count: usize,
    /// Open peers each node starts with. NAT'd nodes also use them as
    /// their initial parents.
    pub bootstrap_size: usize,
    /// Fraction of nodes behind a NAT (0.0 - 1.0). The first node is always
    /// open.
    pub nated_fraction: f64,
    /// Nodes to kill
    pub kills: usize,
    /// Directed links to kill
    pub dead_links: usize,
    /// Delay before the first failure is injected
    pub failure_after: Duration,
    /// Gap between successive node kills
    pub kill_interval: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            node_count: 20,
            bootstrap_size: 3,
            nated_fraction: 0.0,
            kills: 0,
            dead_links: 0,
            failure_after: Duration::from_secs(20),
            kill_interval: Duration::from_secs(1),
        }
    }
}

impl ScenarioConfig {
    /// Boot `node_count` nodes and let them run.
    pub fn simple_boot(node_count: usize) -> Self {
        Self {
            node_count,
            ..Self::default()
        }
    }

    /// Boot, then kill `kills` nodes one `kill_interval` apart.
    pub fn with_node_deaths(node_count: usize, kills: usize) -> Self {
        Self {
            node_count,
            kills,
            ..Self::default()
        }
    }

    /// Boot, then kill `links` random directed links.
    pub fn with_dead_links(node_count: usize, links: usize) -> Self {
        Self {
            node_count,
            dead_links: links,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_bootstrap_size(mut self, size: usize) -> Self {
        self.bootstrap_size = size;
        self
    }

    #[must_use]
    pub fn with_nated_fraction(mut self, fraction: f64) -> Self {
        self.nated_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_failure_after(mut self, after: Duration) -> Self {
        self.failure_after = after;
        self
    }

    #[must_use]
    pub fn with_kill_interval(mut self, interval: Duration) -> Self {
        self.kill_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_count == 0 {
            return Err(Error::Config("node_count must be positive".to_string()));
        }
        if self.bootstrap_size == 0 {
            return Err(Error::Config("bootstrap_size must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.nated_fraction) {
            return Err(Error::Config(format!(
                "nated_fraction {} outside [0, 1]",
                self.nated_fraction
            )));
        }
        if self.kills >= self.node_count {
            return Err(Error::Config("kills must leave at least one node".to_string()));
        }
        Ok(())
    }
}

/// A built scenario, ready to run.
pub struct Scenario {
    pub simulation: Simulation,
    /// Every node, in start order.
    pub nodes: Vec<NodeAddr>,
    /// NAT'd nodes.
    pub nated: Vec<NodeAddr>,
    /// Nodes scheduled to be killed.
    pub doomed: Vec<NodeAddr>,
    /// Directed links cut at `failure_after`.
    pub cut_links: Vec<(NodeAddr, NodeAddr)>,
    pub failure_after: Duration,
    links_cut: bool,
}

impl Scenario {
    /// Build the population and schedule the failures. The relay parent
    /// count follows `bootstrap_size`.
    pub fn build(config: SimulationConfig, scenario: ScenarioConfig) -> Result<Self> {
        scenario.validate()?;
        let relay = config.relay.clone().with_parent_count(scenario.bootstrap_size);
        let seed = config.seed;
        let mut simulation = Simulation::new(config.with_relay(relay))?;
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(0x5eed));

        let mut nodes = Vec::with_capacity(scenario.node_count);
        let mut open: Vec<NodeAddr> = Vec::new();
        let mut nated = Vec::new();

        for index in 0..scenario.node_count {
            let id = node_addr(FIRST_NODE_ID + index as u32);
            let bootstrap: Vec<NodeAddr> = open
                .choose_multiple(&mut rng, scenario.bootstrap_size)
                .copied()
                .collect();

            let wants_nat = index > 0 && rng.gen_bool(scenario.nated_fraction);
            let address = if wants_nat && !bootstrap.is_empty() {
                nated.push(id);
                PeerAddress::nated(id, ParentSet::new(bootstrap.iter().copied()))
            } else {
                open.push(id);
                PeerAddress::open(id)
            };

            simulation.add_node(address, bootstrap.into_iter().map(PeerAddress::open))?;
            nodes.push(id);
        }

        let doomed: Vec<NodeAddr> = nodes
            .choose_multiple(&mut rng, scenario.kills)
            .copied()
            .collect();
        for (i, node) in doomed.iter().enumerate() {
            let after = scenario.failure_after + scenario.kill_interval * i as u32;
            simulation.schedule_kill(*node, after);
        }

        let mut cut_links = Vec::new();
        if nodes.len() > 1 {
            while cut_links.len() < scenario.dead_links {
                let pair: Vec<NodeAddr> = nodes.choose_multiple(&mut rng, 2).copied().collect();
                let link = (pair[0], pair[1]);
                if !cut_links.contains(&link) {
                    cut_links.push(link);
                }
                if cut_links.len() == nodes.len() * (nodes.len() - 1) {
                    break;
                }
            }
        }

        info!(
            nodes = nodes.len(),
            nated = nated.len(),
            kills = doomed.len(),
            dead_links = cut_links.len(),
            "scenario built"
        );

        Ok(Self {
            simulation,
            nodes,
            nated,
            doomed,
            cut_links,
            failure_after: scenario.failure_after,
            links_cut: false,
        })
    }

    /// Run for `duration`, cutting the chosen links when simulated time
    /// reaches `failure_after`.
    pub fn run(&mut self, duration: Duration) {
        let now = self.simulation.now();
        let end = now + duration;
        if !self.links_cut && !self.cut_links.is_empty() && self.failure_after <= end {
            self.simulation.run_for(self.failure_after.saturating_sub(now));
            for (from, to) in &self.cut_links {
                self.simulation.network_mut().kill_link(*from, *to);
            }
            self.links_cut = true;
        }
        self.simulation.run_for(end.saturating_sub(self.simulation.now()));
    }

    /// Nodes still running.
    pub fn survivors(&self) -> Vec<NodeAddr> {
        self.nodes
            .iter()
            .copied()
            .filter(|n| self.simulation.is_running(n))
            .collect()
    }
}

/// Simulated address of node `id`.
pub fn node_addr(id: u32) -> NodeAddr {
    NodeAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), NODE_PORT, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_node_is_open_and_ids_start_at_ten() {
        let scenario = Scenario::build(
            SimulationConfig::default(),
            ScenarioConfig::simple_boot(5).with_nated_fraction(1.0),
        )
        .unwrap();

        assert_eq!(scenario.nodes.first(), Some(&node_addr(10)));
        assert!(!scenario.nated.contains(&node_addr(10)));
        // Only node 10 can bootstrap the rest, so everyone else is NAT'd.
        assert_eq!(scenario.nated.len(), 4);
    }

    #[test]
    fn nated_nodes_start_with_open_parents() {
        let scenario = Scenario::build(
            SimulationConfig::default(),
            ScenarioConfig::simple_boot(12).with_nated_fraction(0.5),
        )
        .unwrap();

        for nated in &scenario.nated {
            let host = scenario.simulation.host(nated).unwrap();
            let parents = host.self_address().parents().unwrap();
            assert!(!parents.is_empty());
            assert!(parents.len() <= 3);
            assert!(parents.iter().all(|p| !scenario.nated.contains(p)));
        }
    }

    #[test]
    fn failures_are_planned_up_front() {
        let scenario = Scenario::build(
            SimulationConfig::default(),
            ScenarioConfig::with_node_deaths(10, 3),
        )
        .unwrap();
        assert_eq!(scenario.doomed.len(), 3);

        let links = Scenario::build(
            SimulationConfig::default(),
            ScenarioConfig::with_dead_links(10, 4),
        )
        .unwrap();
        assert_eq!(links.cut_links.len(), 4);
        assert!(links.cut_links.iter().all(|(a, b)| a != b));
    }

    #[test]
    fn rejects_impossible_scenarios() {
        let build = |s: ScenarioConfig| Scenario::build(SimulationConfig::default(), s);
        assert!(build(ScenarioConfig::simple_boot(0)).is_err());
        assert!(build(ScenarioConfig::with_node_deaths(3, 3)).is_err());
        assert!(build(ScenarioConfig::simple_boot(3).with_nated_fraction(2.0)).is_err());
    }
}
