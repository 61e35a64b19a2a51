//! End-to-end scenarios over the deterministic simulator.

use std::time::Duration;

use swim_membership::MemberStatus;
use swim_relay::RelayConfig;
use swim_sim::{node_addr, Scenario, ScenarioConfig, SimEvent, Simulation, SimulationConfig};
use swim_types::{ParentSet, PeerAddress};

fn fast_links() -> SimulationConfig {
    SimulationConfig::default().with_latency(Duration::from_millis(10), Duration::from_millis(100))
}

#[test]
fn twenty_open_nodes_converge() {
    let mut scenario =
        Scenario::build(SimulationConfig::default(), ScenarioConfig::simple_boot(20)).unwrap();
    scenario.run(Duration::from_secs(60));

    let report = scenario.simulation.aggregator().report();
    let last = report.last_complete(20).expect("every node reported");
    assert!(last.rate > 0.99, "convergence {} in round {}", last.rate, last.status_nr);
    assert_eq!(last.disconnected, 0);

    for (_, host) in scenario.simulation.running() {
        assert_eq!(host.detector().directory().alive().len(), 19);
    }
}

#[test]
fn killed_nodes_are_declared_dead_by_every_survivor() {
    let mut scenario = Scenario::build(
        SimulationConfig::default(),
        ScenarioConfig::with_node_deaths(15, 2),
    )
    .unwrap();
    scenario.run(Duration::from_secs(70));

    let survivors = scenario.survivors();
    assert_eq!(survivors.len(), 13);

    for survivor in &survivors {
        let view = scenario.simulation.host(survivor).unwrap().detector().directory();
        for doomed in &scenario.doomed {
            assert_eq!(
                view.status_of(doomed),
                Some(MemberStatus::Dead),
                "{survivor} still thinks {doomed} is around"
            );
        }
    }

    for doomed in &scenario.doomed {
        assert!(scenario.simulation.events().iter().any(|e| matches!(
            e,
            SimEvent::PeerDeclaredDead { peer, .. } if peer == doomed
        )));
    }

    let report = scenario.simulation.aggregator().report();
    let last = report.last_complete(13).unwrap();
    assert!(last.rate > 0.99, "convergence {}", last.rate);
}

#[test]
fn nated_population_converges_through_parents() {
    let mut scenario = Scenario::build(
        fast_links(),
        ScenarioConfig::simple_boot(20).with_nated_fraction(0.3),
    )
    .unwrap();
    assert!(!scenario.nated.is_empty());
    scenario.run(Duration::from_secs(60));

    let events = scenario.simulation.events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, SimEvent::NodeCrashed { .. } | SimEvent::SendFailed { .. })));

    let report = scenario.simulation.aggregator().report();
    let last = report.last_complete(20).unwrap();
    assert!(last.rate > 0.95, "convergence {}", last.rate);

    for nated in &scenario.nated {
        let host = scenario.simulation.host(nated).unwrap();
        assert!(host.detector().counters().received_pings > 0);
    }
}

#[test]
fn dead_parent_is_replaced_exactly_once() {
    let config = fast_links().with_relay(RelayConfig::default().with_parent_count(2));
    let mut sim = Simulation::new(config).unwrap();

    let open: Vec<PeerAddress> = (10..14).map(|id| PeerAddress::open(node_addr(id))).collect();
    sim.add_node(open[0].clone(), []).unwrap();
    for peer in &open[1..] {
        sim.add_node(peer.clone(), [open[0].clone()]).unwrap();
    }
    let child = node_addr(20);
    sim.add_node(
        PeerAddress::nated(child, ParentSet::new([node_addr(10), node_addr(11)])),
        [open[0].clone(), open[1].clone()],
    )
    .unwrap();

    sim.run_for(Duration::from_secs(5));
    assert!(sim.kill(&node_addr(10)));
    sim.run_for(Duration::from_secs(10));

    let changes: Vec<&Vec<_>> = sim
        .events()
        .iter()
        .filter_map(|e| match e {
            SimEvent::ParentsChanged { node, parents, .. } if *node == child => Some(parents),
            _ => None,
        })
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].len(), 2);
    assert!(!changes[0].contains(&node_addr(10)));
    assert!(changes[0].contains(&node_addr(11)));

    let host = sim.host(&child).unwrap();
    assert_eq!(host.self_address().parent_version(), 1);
    assert!(host.relay().dead_parents().contains(&node_addr(10)));
    assert!(host.detector().incarnation() >= 1);
}

#[test]
fn indirect_probes_bridge_dead_links() {
    let mut scenario = Scenario::build(
        SimulationConfig::default(),
        ScenarioConfig::with_dead_links(10, 5),
    )
    .unwrap();
    assert_eq!(scenario.cut_links.len(), 5);
    scenario.run(Duration::from_secs(60));

    assert!(!scenario
        .simulation
        .events()
        .iter()
        .any(|e| matches!(e, SimEvent::PeerDeclaredDead { .. })));
    assert_eq!(scenario.simulation.network().dead_links().len(), 5);
}

#[test]
fn convergence_report_renders_as_json() {
    let mut scenario =
        Scenario::build(fast_links(), ScenarioConfig::simple_boot(6)).unwrap();
    scenario.run(Duration::from_secs(10));

    let json = scenario.simulation.aggregator().report().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["rounds"].as_array().is_some_and(|r| !r.is_empty()));
}
