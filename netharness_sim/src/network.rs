//! Per-run simulated network: ingress routing, relay load and fault overlay.

use crate::node::{NodeModel, NodeSimulator};
use netharness_core::error::HarnessError;
use netharness_core::records::{LinkResult, NodeResult};
use netharness_core::topology::{Link, NodeStatus, Topology};
use netharness_core::transaction::Transaction;
use std::collections::HashMap;
use tracing::debug;

/// Totals for one delivered batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeliveryReport {
    pub offered: u64,
    pub accepted: u64,
    pub processed: u64,
    pub dropped: u64,
}

/// Relay accounting for one link.
#[derive(Debug, Clone)]
struct LinkState {
    link: Link,
    from: usize,
    to: usize,
    relayed: u64,
    peak_saturation: f64,
    saturation_sum: f64,
    ticks: u64,
}

/// A private copy of a topology's nodes and links for one run.
///
/// Concurrent runs on the same topology each build their own network, so
/// fault injection in one run is invisible to every other run and to the
/// registry.
pub struct RunNetwork {
    topology_id: String,
    nodes: Vec<NodeSimulator>,
    index: HashMap<String, usize>,
    by_region: HashMap<String, Vec<usize>>,
    links: Vec<LinkState>,
    elapsed_secs: f64,
}

impl RunNetwork {
    /// Creates a network for one run.
    pub fn new(topology: &Topology, model: NodeModel) -> Self {
        let nodes: Vec<NodeSimulator> = topology
            .nodes
            .iter()
            .map(|spec| NodeSimulator::new(spec.clone(), model))
            .collect();

        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id().to_string(), i))
            .collect();

        let mut by_region: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            by_region.entry(node.region().to_string()).or_default().push(i);
        }

        // Endpoints were checked at registration
        let links = topology
            .links
            .iter()
            .filter_map(|link| {
                Some(LinkState {
                    from: *index.get(&link.from)?,
                    to: *index.get(&link.to)?,
                    link: link.clone(),
                    relayed: 0,
                    peak_saturation: 0.0,
                    saturation_sum: 0.0,
                    ticks: 0,
                })
            })
            .collect();

        Self {
            topology_id: topology.id.clone(),
            nodes,
            index,
            by_region,
            links,
            elapsed_secs: 0.0,
        }
    }

    pub fn topology_id(&self) -> &str {
        &self.topology_id
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeSimulator> {
        self.index.get(node_id).map(|&i| &self.nodes[i])
    }

    /// Overrides a node's status for this run, returning the previous one.
    pub fn set_status(&mut self, node_id: &str, status: NodeStatus) -> Result<NodeStatus, HarnessError> {
        let i = *self
            .index
            .get(node_id)
            .ok_or_else(|| HarnessError::NodeNotFound(node_id.to_string()))?;
        let previous = self.nodes[i].set_status(status);
        debug!("{}: node {} {:?} -> {:?}", self.topology_id, node_id, previous, status);
        Ok(previous)
    }

    /// Restores a node's registry status.
    pub fn reset_status(&mut self, node_id: &str) -> Result<(), HarnessError> {
        let i = *self
            .index
            .get(node_id)
            .ok_or_else(|| HarnessError::NodeNotFound(node_id.to_string()))?;
        self.nodes[i].reset_status();
        Ok(())
    }

    /// Picks the ingress node for a transaction from `region`.
    ///
    /// Prefers accepting nodes in the region, then any accepting node, and
    /// spreads load in proportion to effective capacity. When every node is
    /// down the first node of the region (or of the topology) takes the
    /// traffic so the drops are attributed somewhere.
    fn route(&self, region: &str, assigned: &[u64]) -> usize {
        let regional = self.by_region.get(region).map(Vec::as_slice).unwrap_or(&[]);

        let least_loaded = |candidates: &mut dyn Iterator<Item = usize>| {
            candidates
                .filter(|&i| self.nodes[i].is_accepting())
                .min_by(|&a, &b| {
                    let load = |i: usize| (assigned[i] + 1) as f64 / self.nodes[i].effective_capacity_tps();
                    load(a).total_cmp(&load(b)).then(a.cmp(&b))
                })
        };

        least_loaded(&mut regional.iter().copied())
            .or_else(|| least_loaded(&mut (0..self.nodes.len())))
            .or_else(|| regional.first().copied())
            .unwrap_or(0)
    }

    /// Delivers one tick's batch and advances every node by `dt` seconds.
    pub fn deliver(&mut self, batch: &[Transaction], dt: f64) -> DeliveryReport {
        let mut assigned = vec![0u64; self.nodes.len()];
        if !self.nodes.is_empty() {
            for tx in batch {
                let i = self.route(&tx.region, &assigned);
                assigned[i] += 1;
            }
        }

        let mut report = DeliveryReport {
            offered: batch.len() as u64,
            ..Default::default()
        };
        let mut accepted = vec![0u64; self.nodes.len()];
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let tick = node.step(assigned[i], dt);
            accepted[i] = tick.accepted;
            report.accepted += tick.accepted;
            report.processed += tick.processed;
            report.dropped += tick.dropped;
        }

        // Accepted transactions are gossiped one hop to every accepting peer
        for state in &mut self.links {
            let mut load = 0;
            if self.nodes[state.to].is_accepting() {
                load += accepted[state.from];
            }
            if self.nodes[state.from].is_accepting() {
                load += accepted[state.to];
            }
            let capacity = state.link.bandwidth_tps * dt;
            let saturation = if capacity > 0.0 { load as f64 / capacity } else { 0.0 };

            state.relayed += load;
            state.peak_saturation = state.peak_saturation.max(saturation);
            state.saturation_sum += saturation;
            state.ticks += 1;
        }

        self.elapsed_secs += dt;
        if report.dropped > 0 {
            debug!("{}: dropped {} of {} transactions", self.topology_id, report.dropped, report.offered);
        }
        report
    }

    /// Transactions still waiting in node queues.
    pub fn queued(&self) -> u64 {
        self.nodes.iter().map(NodeSimulator::queued).sum()
    }

    pub fn processed(&self) -> u64 {
        self.nodes.iter().map(NodeSimulator::processed).sum()
    }

    pub fn dropped(&self) -> u64 {
        self.nodes.iter().map(NodeSimulator::dropped).sum()
    }

    /// Mean processing latency over every processed transaction.
    pub fn avg_latency_ms(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 0.0;
        }
        self.nodes.iter().map(NodeSimulator::latency_weighted_ms).sum::<f64>() / processed as f64
    }

    pub fn node_results(&self) -> Vec<NodeResult> {
        self.nodes.iter().map(|n| n.result(self.elapsed_secs)).collect()
    }

    pub fn link_results(&self) -> Vec<LinkResult> {
        self.links
            .iter()
            .map(|s| LinkResult {
                from: s.link.from.clone(),
                to: s.link.to.clone(),
                relayed: s.relayed,
                peak_saturation: s.peak_saturation,
                avg_saturation: if s.ticks > 0 {
                    s.saturation_sum / s.ticks as f64
                } else {
                    0.0
                },
            })
            .collect()
    }
}
