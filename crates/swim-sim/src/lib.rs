//! SWIM simulation harness
//!
//! Runs many [`swim_node::Host`]s in one process on simulated time:
//!
//! - **Simulation**: seeded discrete-event loop with a peer-sample feed
//! - **Network**: uniform latency, message loss, dead links, disconnected nodes
//! - **Aggregator**: per-round convergence over the nodes' status reports
//! - **Scenarios**: boot, node deaths, dead links, NAT'd fractions
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use swim_sim::{Scenario, ScenarioConfig, SimulationConfig};
//!
//! let mut scenario =
//!     Scenario::build(SimulationConfig::default(), ScenarioConfig::simple_boot(5))?;
//! scenario.run(Duration::from_secs(10));
//! let report = scenario.simulation.aggregator().report();
//! assert!(!report.rounds.is_empty());
//! # Ok::<(), swim_sim::Error>(())
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod scenario;
pub mod simulation;

pub use aggregator::{Aggregator, ConvergenceReport, RoundConvergence};
pub use config::SimulationConfig;
pub use error::{Error, Result};
pub use events::SimEvent;
pub use network::NetworkModel;
pub use scenario::{node_addr, Scenario, ScenarioConfig};
pub use simulation::Simulation;
