//! Property tests for the load engine, node and network accounting, and
//! custom topology registration.

use crate::load_engine::{EngineState, LoadProfileEngine};
use crate::network::RunNetwork;
use crate::node::{NodeModel, NodeSimulator};
use crate::runner::{MixSource, TransactionSource};
use netharness_core::catalog::WorkloadCatalog;
use netharness_core::profile::{expected_transactions, Phase};
use netharness_core::topology::{Link, NodeRole, NodeSpec, NodeStatus, TopologyRegistry, TopologySpec};
use proptest::prelude::*;

fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(48);
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

prop_compose! {
    fn arb_phase()(duration in prop_oneof![Just(0.0), 0.5f64..30.0],
                   ramp in 0.0f64..20.0,
                   target in 0.0f64..200.0) -> Phase {
        Phase::new("p", duration, ramp, target)
    }
}

fn arb_status() -> impl Strategy<Value = NodeStatus> {
    prop_oneof![Just(NodeStatus::Up), Just(NodeStatus::Degraded), Just(NodeStatus::Down)]
}

proptest! {
    #![proptest_config(proptest_config())]
    #[test]
    fn engine_requests_match_the_closed_form(phases in prop::collection::vec(arb_phase(), 1..5),
                                             dt in prop_oneof![Just(1.0), Just(0.25), 0.1f64..3.0]) {
        let expected = expected_transactions(&phases, dt);
        let total_secs: f64 = phases.iter().map(|p| p.duration_secs).sum();

        let mut engine = LoadProfileEngine::new(phases);
        let mut total = 0u64;
        let mut elapsed = 0.0;
        while let Some(plan) = engine.tick(dt) {
            prop_assert!(plan.slice_secs <= dt + 1e-9);
            total += plan.transactions;
            elapsed += plan.slice_secs;
            engine.record(&plan, plan.transactions, 0);
        }

        prop_assert_eq!(engine.state(), EngineState::Completed);
        prop_assert_eq!(total, expected);
        prop_assert_eq!(engine.requested(), total);
        prop_assert!((elapsed - total_secs).abs() < 1e-6);
        let booked: u64 = engine.metrics().iter().map(|m| m.transactions).sum();
        prop_assert_eq!(booked, total);
    }

    #[test]
    fn node_conserves_arrivals(capacity in 0.5f64..200.0,
                               ticks in prop::collection::vec((0u64..400, arb_status()), 1..40)) {
        let spec = NodeSpec::new("n", NodeRole::Validator, "r", capacity, 10.0);
        let mut node = NodeSimulator::new(spec, NodeModel::default());

        let mut offered = 0;
        for (arrivals, status) in ticks {
            node.set_status(status);
            let tick = node.step(arrivals, 1.0);
            prop_assert_eq!(tick.accepted + tick.dropped, arrivals);
            prop_assert!(node.queued() <= node.queue_limit());
            offered += arrivals;
        }

        let result = node.result(1.0);
        prop_assert_eq!(result.offered, offered);
        prop_assert_eq!(result.offered, result.processed + result.dropped + result.queued);
    }

    #[test]
    fn network_conserves_emitted(seed in any::<u64>(),
                                 topology_index in 0usize..3,
                                 ticks in prop::collection::vec((0usize..300, arb_status()), 1..20)) {
        let registry = TopologyRegistry::with_builtins();
        let topology = registry.list_topologies().swap_remove(topology_index);
        let catalog = WorkloadCatalog::with_builtins();
        let mix = catalog.default_mix().unwrap();

        let mut network = RunNetwork::new(&topology, NodeModel::default());
        let mut source = MixSource::new(mix, topology.regions(), seed);
        let first_node = topology.nodes[0].id.clone();

        let mut emitted = 0u64;
        for (count, status) in ticks {
            network.set_status(&first_node, status).unwrap();
            let batch = source.next_batch(count).unwrap();
            let report = network.deliver(&batch, 1.0);
            prop_assert_eq!(report.offered, batch.len() as u64);
            emitted += batch.len() as u64;
        }

        prop_assert_eq!(emitted, network.processed() + network.dropped() + network.queued());
        let per_node: u64 = network.node_results().iter().map(|n| n.offered).sum();
        prop_assert_eq!(per_node, emitted);
    }

    #[test]
    fn custom_topologies_keep_their_links(node_count in 1usize..8, seed in any::<u64>()) {
        let registry = TopologyRegistry::with_builtins();
        let nodes: Vec<NodeSpec> = (0..node_count)
            .map(|i| NodeSpec::new(&format!("n{}", i), NodeRole::Relay, "r", 10.0, 5.0))
            .collect();
        let links = (1..node_count)
            .map(|i| {
                let peer = (seed as usize).wrapping_add(i) % i;
                Link::new(&format!("n{}", i), &format!("n{}", peer), 10.0, 1.0)
            })
            .collect();
        let spec = TopologySpec {
            name: "generated".into(),
            description: None,
            nodes,
            links,
        };

        let topology = registry.create_custom_topology(spec).unwrap();
        prop_assert!(topology.custom);
        for link in &topology.links {
            prop_assert!(topology.node(&link.from).is_some());
            prop_assert!(topology.node(&link.to).is_some());
        }
        let stored = registry.get_topology(&topology.id);
        prop_assert_eq!(stored, Some(topology));
    }
}
