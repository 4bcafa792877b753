//! Run records: test runs, generations and their metrics.

use crate::pattern::TransactionPattern;
use crate::scenario::Scenario;
use crate::topology::NodeStatus;
use netharness_env::RunId;
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by test runs and generations.
///
/// Test runs start directly in `Running`; only scheduled generations use
/// `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl RunStatus {
    /// Terminal statuses are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Stopped | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Metrics for one load-profile phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseMetrics {
    pub phase: String,
    /// Simulated seconds spent in this phase
    pub elapsed_secs: f64,
    pub transactions: u64,
    pub errors: u64,
    pub achieved_tps: f64,
    pub target_tps: f64,
}

impl PhaseMetrics {
    pub fn new(phase: &str, target_tps: f64) -> Self {
        Self {
            phase: phase.to_string(),
            target_tps,
            ..Default::default()
        }
    }

    /// Adds one tick's worth of traffic.
    pub fn record(&mut self, slice_secs: f64, transactions: u64, errors: u64) {
        self.elapsed_secs += slice_secs;
        self.transactions += transactions;
        self.errors += errors;
        self.achieved_tps = if self.elapsed_secs > 0.0 {
            self.transactions as f64 / self.elapsed_secs
        } else {
            0.0
        };
    }
}

/// A load-only run (no topology).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub id: RunId,
    pub profile_id: String,
    pub regions: Vec<String>,
    pub user_behaviors: Vec<String>,
    pub custom_patterns: Vec<TransactionPattern>,
    pub status: RunStatus,
    pub seed: u64,
    /// Scheduled start (ms since UNIX epoch)
    pub start_time_ms: u64,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
    pub phases: Vec<PhaseMetrics>,
    pub total_transactions: u64,
    pub total_errors: u64,
    pub failure_reason: Option<String>,
}

/// Per-node outcome of a test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    /// Transactions offered to this node as ingress
    pub offered: u64,
    pub processed: u64,
    pub dropped: u64,
    /// Still queued when the run ended
    pub queued: u64,
    pub throughput_tps: f64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    pub peak_utilization: f64,
    pub final_status: NodeStatus,
}

/// Per-link outcome of a test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResult {
    pub from: String,
    pub to: String,
    pub relayed: u64,
    /// Highest per-tick load / bandwidth ratio
    pub peak_saturation: f64,
    pub avg_saturation: f64,
}

/// A fault that was applied during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultRecord {
    pub node_id: String,
    pub status: NodeStatus,
    pub applied_at_secs: f64,
    pub reverted_at_secs: Option<f64>,
}

/// Aggregated network-level results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub ticks: u64,
    pub elapsed_secs: f64,
    /// Transactions synthesized and offered to the network
    pub emitted: u64,
    pub processed: u64,
    pub dropped: u64,
    pub queued: u64,
    pub avg_latency_ms: f64,
    pub phases: Vec<PhaseMetrics>,
    pub nodes: Vec<NodeResult>,
    pub links: Vec<LinkResult>,
    pub faults: Vec<FaultRecord>,
}

impl TestResults {
    /// Every emitted transaction is processed, dropped or still queued.
    pub fn is_conserved(&self) -> bool {
        self.emitted == self.processed + self.dropped + self.queued
    }
}

/// One execution of a scenario against a topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub id: RunId,
    pub topology_id: String,
    pub scenario: Scenario,
    pub status: RunStatus,
    pub seed: u64,
    pub started_at_ms: u64,
    pub stopped_at_ms: Option<u64>,
    pub results: TestResults,
    pub failure_reason: Option<String>,
}
