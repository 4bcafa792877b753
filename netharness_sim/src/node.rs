//! Per-run node simulator: bounded queue, capacity and congestion latency.

use crate::config::HarnessConfig;
use netharness_core::records::NodeResult;
use netharness_core::topology::{NodeSpec, NodeStatus};

/// Highest utilization fed into the latency curve.
pub const MAX_UTILIZATION: f64 = 0.99;

/// Model parameters shared by every node of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeModel {
    /// Queue bound in seconds of nominal capacity
    pub queue_depth_secs: f64,
    /// `k` in `base × (1 + k·u/(1−u))`
    pub congestion_factor: f64,
}

impl Default for NodeModel {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}

impl From<&HarnessConfig> for NodeModel {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            queue_depth_secs: config.queue_depth_secs,
            congestion_factor: config.congestion_factor,
        }
    }
}

/// What happened at one node during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeTick {
    pub accepted: u64,
    pub dropped: u64,
    pub processed: u64,
    pub utilization: f64,
    pub latency_ms: f64,
}

/// Simulated node owned by a single run.
///
/// The registry's `NodeSpec` is copied in; status changes made here are an
/// overlay that never reaches the registry.
#[derive(Debug, Clone)]
pub struct NodeSimulator {
    spec: NodeSpec,
    model: NodeModel,
    status: NodeStatus,
    queue: u64,
    /// Fractional capacity carried into the next tick
    carry: f64,
    offered: u64,
    processed: u64,
    dropped: u64,
    latency_weighted_ms: f64,
    max_latency_ms: f64,
    peak_utilization: f64,
}

impl NodeSimulator {
    pub fn new(spec: NodeSpec, model: NodeModel) -> Self {
        let status = spec.status;
        Self {
            spec,
            model,
            status,
            queue: 0,
            carry: 0.0,
            offered: 0,
            processed: 0,
            dropped: 0,
            latency_weighted_ms: 0.0,
            max_latency_ms: 0.0,
            peak_utilization: 0.0,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn region(&self) -> &str {
        &self.spec.region
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Overrides the status for this run, returning the previous one.
    pub fn set_status(&mut self, status: NodeStatus) -> NodeStatus {
        std::mem::replace(&mut self.status, status)
    }

    /// Restores the status the node had in the registry.
    pub fn reset_status(&mut self) {
        self.status = self.spec.status;
    }

    pub fn is_accepting(&self) -> bool {
        self.status != NodeStatus::Down
    }

    pub fn effective_capacity_tps(&self) -> f64 {
        match self.status {
            NodeStatus::Up => self.spec.capacity_tps,
            NodeStatus::Degraded => self.spec.capacity_tps * 0.5,
            NodeStatus::Down => 0.0,
        }
    }

    pub fn effective_base_latency_ms(&self) -> f64 {
        match self.status {
            NodeStatus::Degraded => self.spec.base_latency_ms * 2.0,
            _ => self.spec.base_latency_ms,
        }
    }

    /// Most transactions the node can hold between ticks.
    pub fn queue_limit(&self) -> u64 {
        (self.spec.capacity_tps * self.model.queue_depth_secs).floor().max(0.0) as u64
    }

    pub fn queued(&self) -> u64 {
        self.queue
    }

    /// Processing delay at the given utilization.
    pub fn latency_ms(&self, utilization: f64) -> f64 {
        let u = utilization.clamp(0.0, MAX_UTILIZATION);
        self.effective_base_latency_ms() * (1.0 + self.model.congestion_factor * u / (1.0 - u))
    }

    /// Offers `arrivals` new transactions and serves one tick of `dt` seconds.
    ///
    /// A down node refuses every arrival and keeps its backlog frozen.
    /// Otherwise the node serves up to `capacity × dt` transactions from
    /// backlog plus arrivals, and whatever would still exceed the queue
    /// bound afterwards is dropped.
    pub fn step(&mut self, arrivals: u64, dt: f64) -> NodeTick {
        self.offered += arrivals;

        if !self.is_accepting() {
            self.dropped += arrivals;
            return NodeTick {
                dropped: arrivals,
                ..Default::default()
            };
        }

        let capacity = self.effective_capacity_tps() * dt;
        let budget_f = capacity + self.carry;
        let budget = budget_f.floor().max(0.0) as u64;

        let room = (self.queue_limit() + budget).saturating_sub(self.queue);
        let accepted = arrivals.min(room);
        let dropped = arrivals - accepted;
        self.queue += accepted;

        let processed = self.queue.min(budget);
        self.queue -= processed;
        self.carry = if processed == budget { budget_f - budget as f64 } else { 0.0 };

        let utilization = if capacity > 0.0 { arrivals as f64 / capacity } else { 1.0 };
        let latency_ms = self.latency_ms(utilization);

        self.processed += processed;
        self.dropped += dropped;
        if processed > 0 {
            self.latency_weighted_ms += latency_ms * processed as f64;
            self.max_latency_ms = self.max_latency_ms.max(latency_ms);
        }
        self.peak_utilization = self.peak_utilization.max(utilization);

        NodeTick {
            accepted,
            dropped,
            processed,
            utilization,
            latency_ms,
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Sum of per-transaction latency, for run-wide averages.
    pub fn latency_weighted_ms(&self) -> f64 {
        self.latency_weighted_ms
    }

    /// Snapshot of this node's metrics after `elapsed_secs` of simulation.
    pub fn result(&self, elapsed_secs: f64) -> NodeResult {
        NodeResult {
            node_id: self.spec.id.clone(),
            offered: self.offered,
            processed: self.processed,
            dropped: self.dropped,
            queued: self.queue,
            throughput_tps: if elapsed_secs > 0.0 {
                self.processed as f64 / elapsed_secs
            } else {
                0.0
            },
            avg_latency_ms: if self.processed > 0 {
                self.latency_weighted_ms / self.processed as f64
            } else {
                0.0
            },
            max_latency_ms: self.max_latency_ms,
            peak_utilization: self.peak_utilization,
            final_status: self.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netharness_core::topology::NodeRole;

    fn node(capacity: f64) -> NodeSimulator {
        NodeSimulator::new(
            NodeSpec::new("n1", NodeRole::Validator, "us-east", capacity, 20.0),
            NodeModel {
                queue_depth_secs: 2.0,
                congestion_factor: 0.5,
            },
        )
    }

    #[test]
    fn test_under_capacity_processes_everything() {
        let mut n = node(100.0);
        let tick = n.step(60, 1.0);

        assert_eq!(tick.accepted, 60);
        assert_eq!(tick.processed, 60);
        assert_eq!(n.queued(), 0);
        // u = 0.6 -> 20 × (1 + 0.5 × 1.5)
        assert!((tick.latency_ms - 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_queue_overflow_is_dropped() {
        let mut n = node(100.0);
        // Serves 100, queues up to 200 more, drops the rest
        let tick = n.step(500, 1.0);
        assert_eq!(tick.processed, 100);
        assert_eq!(n.queued(), 200);
        assert_eq!(tick.dropped, 200);

        let result = n.result(1.0);
        assert_eq!(result.offered, result.processed + result.dropped + result.queued);
        assert!(result.peak_utilization > 1.0);
    }

    #[test]
    fn test_degraded_halves_capacity_and_doubles_latency() {
        let mut n = node(100.0);
        assert_eq!(n.set_status(NodeStatus::Degraded), NodeStatus::Up);

        assert_eq!(n.effective_capacity_tps(), 50.0);
        assert_eq!(n.latency_ms(0.0), 40.0);
        let tick = n.step(80, 1.0);
        assert_eq!(tick.processed, 50);
        assert_eq!(n.queued(), 30);
    }

    #[test]
    fn test_down_refuses_and_freezes_backlog() {
        let mut n = node(100.0);
        n.step(150, 1.0);
        assert_eq!(n.queued(), 50);

        n.set_status(NodeStatus::Down);
        let tick = n.step(40, 1.0);
        assert_eq!(tick.dropped, 40);
        assert_eq!(tick.processed, 0);
        assert_eq!(n.queued(), 50);

        n.reset_status();
        assert_eq!(n.status(), NodeStatus::Up);
        n.step(0, 1.0);
        assert_eq!(n.queued(), 0);
    }

    #[test]
    fn test_fractional_capacity_carries_over() {
        let mut n = node(2.5);
        let processed: u64 = (0..4).map(|_| n.step(3, 1.0).processed).sum();
        // 2.5 TPS over 4 seconds
        assert_eq!(processed, 10);
    }

    #[test]
    fn test_latency_is_capped() {
        let n = node(100.0);
        let at_cap = n.latency_ms(MAX_UTILIZATION);
        assert_eq!(n.latency_ms(5.0), at_cap);
        assert!(at_cap.is_finite());
    }
}
