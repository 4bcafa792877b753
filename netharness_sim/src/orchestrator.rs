//! Test orchestrator - starts, stops and tracks network tests.

use crate::active::{epoch_millis, panic_message, ActiveRuns, Publisher};
use crate::config::HarnessConfig;
use crate::runner::{RunDirective, StepOutcome, TestRunner};
use crate::seeds::SeedProvider;

use netharness_core::catalog::WorkloadCatalog;
use netharness_core::error::HarnessError;
use netharness_core::history::{HistoryEntry, HistoryRepository};
use netharness_core::records::{RunStatus, TestResults, TestRun};
use netharness_core::scenario::{FaultDirective, Scenario};
use netharness_core::topology::TopologyRegistry;
use netharness_env::{control_channel, ControlHandle, HarnessContext, RunId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runs network tests as independent tasks.
///
/// Each test owns its clock, node overlay and RNG stream; the orchestrator
/// only reads the snapshots the drivers publish and sends control messages.
pub struct TestOrchestrator<C: HarnessContext> {
    ctx: Arc<C>,
    registry: Arc<TopologyRegistry>,
    catalog: Arc<WorkloadCatalog>,
    history: Arc<dyn HistoryRepository>,
    seeds: Arc<SeedProvider>,
    config: HarnessConfig,
    runs: Arc<ActiveRuns<TestRun, RunDirective>>,
}

impl<C: HarnessContext> TestOrchestrator<C> {
    pub fn new(
        ctx: Arc<C>,
        registry: Arc<TopologyRegistry>,
        catalog: Arc<WorkloadCatalog>,
        history: Arc<dyn HistoryRepository>,
        seeds: Arc<SeedProvider>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            ctx,
            registry,
            catalog,
            history,
            seeds,
            config,
            runs: Arc::new(ActiveRuns::new()),
        }
    }

    /// Validates a scenario and starts it against a topology.
    ///
    /// Nothing is created when the topology is unknown or the scenario does
    /// not resolve. The returned record is the run as it was started.
    pub fn start_network_test(&self, topology_id: &str, scenario: Scenario) -> Result<TestRun, HarnessError> {
        let topology = self
            .registry
            .get_topology(topology_id)
            .ok_or_else(|| HarnessError::TopologyNotFound(topology_id.to_string()))?;

        let resolved = scenario.resolve(&self.catalog, &topology).map_err(|e| {
            warn!("Rejected scenario for {}: {}", topology_id, e);
            e
        })?;

        let seed = self.seeds.next_seed(self.ctx.as_ref(), scenario.seed);
        let id = RunId::new();
        let (control, inbox) = control_channel(id);

        let record = TestRun {
            id,
            topology_id: topology.id.clone(),
            scenario,
            status: RunStatus::Running,
            seed,
            started_at_ms: epoch_millis(self.ctx.system_time()),
            stopped_at_ms: None,
            results: TestResults::default(),
            failure_reason: None,
        };

        info!(
            "Starting test {} on {} ({}, seed={})",
            id, topology.id, resolved.name, seed
        );
        let runner = TestRunner::new(record.clone(), resolved, &topology, inbox, &self.config);
        self.launch(runner, control);
        Ok(record)
    }

    fn launch(&self, runner: TestRunner, control: ControlHandle<RunDirective>) {
        let initial = runner.snapshot();
        let id = initial.id;
        let publisher = self.runs.insert(id, control, initial);

        let driver = RunDriver {
            ctx: Arc::new(self.ctx.fork()),
            runner,
            publisher,
            runs: Arc::clone(&self.runs),
            history: Arc::clone(&self.history),
            wall_tick: self.config.wall_tick(),
        };
        self.ctx.spawn(&format!("test-{}", id), driver.run());
    }

    /// Requests a stop.
    ///
    /// Returns false for unknown runs, runs that already finished, and runs
    /// that were already asked to stop. The driver applies the stop at its
    /// next tick.
    pub fn stop_test(&self, id: RunId) -> bool {
        let Some(snapshot) = self.runs.get(id) else {
            debug!("stop_test: {} is not active", id);
            return false;
        };
        if snapshot.status.is_terminal() {
            return false;
        }
        let Some(control) = self.runs.control(id) else {
            return false;
        };

        match control.request_stop() {
            Ok(true) => {
                info!("Stop requested for test {}", id);
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!("stop_test: {}", e);
                false
            }
        }
    }

    /// Changes a node's status inside one running test.
    pub fn inject_fault(&self, id: RunId, fault: FaultDirective) -> Result<(), HarnessError> {
        let snapshot = self
            .runs
            .get(id)
            .ok_or_else(|| HarnessError::TestNotFound(id.to_string()))?;
        if snapshot.status.is_terminal() {
            return Err(HarnessError::AlreadyTerminal(id.to_string()));
        }

        let known = self
            .registry
            .get_topology(&snapshot.topology_id)
            .map_or(false, |t| t.node(&fault.node_id).is_some());
        if !known {
            return Err(HarnessError::NodeNotFound(fault.node_id));
        }

        let control = self
            .runs
            .control(id)
            .ok_or_else(|| HarnessError::TestNotFound(id.to_string()))?;
        control
            .send(RunDirective::InjectFault(fault))
            .map_err(|_| HarnessError::AlreadyTerminal(id.to_string()))
    }

    /// Tests that have not reached a terminal status, oldest first.
    pub fn running_tests(&self) -> Vec<TestRun> {
        let mut running: Vec<TestRun> = self
            .runs
            .snapshots()
            .into_iter()
            .filter(|run| !run.status.is_terminal())
            .collect();
        running.sort_by(|a, b| a.started_at_ms.cmp(&b.started_at_ms).then(a.id.cmp(&b.id)));
        running
    }

    /// Finished tests, optionally for one topology, in completion order.
    pub fn test_history(&self, topology_id: Option<&str>) -> Vec<TestRun> {
        self.history.test_runs(topology_id)
    }

    /// Latest view of a test, active or historical.
    pub fn get_test(&self, id: RunId) -> Option<TestRun> {
        self.runs.get(id).or_else(|| {
            self.history.entries().into_iter().find_map(|entry| match entry {
                HistoryEntry::Test(run) if run.id == id => Some(run),
                _ => None,
            })
        })
    }

    /// Waits for a test to finish and returns its final record.
    pub async fn wait_for(&self, id: RunId) -> Option<TestRun> {
        self.runs.wait_done(id).await;
        self.get_test(id)
    }

    /// Number of tests with a live driver.
    pub fn active_count(&self) -> usize {
        self.runs.len()
    }
}

/// The task that owns a running test.
struct RunDriver<C: HarnessContext> {
    ctx: Arc<C>,
    runner: TestRunner,
    publisher: Publisher<TestRun>,
    runs: Arc<ActiveRuns<TestRun, RunDirective>>,
    history: Arc<dyn HistoryRepository>,
    wall_tick: Duration,
}

impl<C: HarnessContext> RunDriver<C> {
    async fn run(self) {
        let RunDriver {
            ctx,
            mut runner,
            publisher,
            runs,
            history,
            wall_tick,
        } = self;

        loop {
            let now_ms = epoch_millis(ctx.system_time());
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| runner.step(now_ms))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!("Test {}: {}", runner.snapshot().id, reason);
                    runner.abort(reason, now_ms)
                }
            };
            publisher.publish(runner.snapshot());
            match outcome {
                StepOutcome::Continue => ctx.sleep(wall_tick).await,
                StepOutcome::Finished(_) => break,
            }
        }

        let record = runner.into_record();
        let id = record.id;
        match history.append(HistoryEntry::Test(record)) {
            // The slot is dropped only once history can answer for the run
            Ok(()) => runs.remove(id),
            Err(e) => error!("Failed to record test {}: {}", id, e),
        }
        publisher.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use crate::runner::TransactionSource;
    use netharness_core::history::InMemoryHistory;
    use netharness_core::profile::Phase;
    use netharness_core::topology::NodeStatus;
    use netharness_core::transaction::Transaction;

    fn orchestrator() -> TestOrchestrator<SimContext> {
        TestOrchestrator::new(
            SimContext::shared(42),
            Arc::new(TopologyRegistry::with_builtins()),
            Arc::new(WorkloadCatalog::with_builtins()),
            Arc::new(InMemoryHistory::new()),
            Arc::new(SeedProvider::new()),
            HarnessConfig::default(),
        )
    }

    fn ramp_then_sustain() -> Scenario {
        Scenario::from_phases(vec![Phase::new("ramp", 10.0, 5.0, 50.0), Phase::new("sustain", 20.0, 0.0, 50.0)])
    }

    #[tokio::test]
    async fn test_three_node_two_phase_run() {
        let orch = orchestrator();
        let started = orch.start_network_test("minimal-3", ramp_then_sustain()).unwrap();
        assert_eq!(started.status, RunStatus::Running);

        let run = orch.wait_for(started.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.results.emitted, 1275);
        assert!(run.results.is_conserved());
        assert_eq!(run.results.nodes.len(), 3);

        assert!(orch.running_tests().is_empty());
        assert_eq!(orch.test_history(Some("minimal-3")).len(), 1);
        assert!(orch.test_history(Some("hub-and-spoke")).is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let orch = orchestrator();
        let run = orch.start_network_test("minimal-3", ramp_then_sustain()).unwrap();

        // The driver has not been polled yet on this runtime
        assert!(orch.stop_test(run.id));
        assert!(!orch.stop_test(run.id));

        let stopped = orch.wait_for(run.id).await.unwrap();
        assert_eq!(stopped.status, RunStatus::Stopped);
        assert!(stopped.stopped_at_ms.is_some());

        // A late stop leaves the frozen record alone
        let frozen = orch.test_history(None)[0].clone();
        assert!(!orch.stop_test(run.id));
        assert_eq!(orch.test_history(None), vec![frozen.clone()]);
        assert_eq!(orch.get_test(run.id), Some(frozen));
    }

    #[tokio::test]
    async fn test_unknown_references() {
        let orch = orchestrator();
        assert!(matches!(
            orch.start_network_test("nope", ramp_then_sustain()),
            Err(HarnessError::TopologyNotFound(_))
        ));
        assert!(matches!(
            orch.start_network_test("minimal-3", Scenario::from_profile("nope")),
            Err(HarnessError::InvalidScenario(_))
        ));
        assert_eq!(orch.active_count(), 0);
        assert!(!orch.stop_test(RunId::new()));
        assert!(orch.wait_for(RunId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_runs_on_same_topology_are_isolated() {
        let orch = orchestrator();
        let faulted = Scenario::from_phases(vec![Phase::new("flat", 10.0, 0.0, 60.0)])
            .with_fault(FaultDirective::new("validator-1", NodeStatus::Down, 0.0));
        let clean = Scenario::from_phases(vec![Phase::new("flat", 10.0, 0.0, 60.0)]);

        let a = orch.start_network_test("minimal-3", faulted).unwrap();
        let b = orch.start_network_test("minimal-3", clean).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.seed, b.seed);
        assert_eq!(orch.running_tests().len(), 2);

        let a = orch.wait_for(a.id).await.unwrap();
        let b = orch.wait_for(b.id).await.unwrap();

        let offered = |run: &TestRun, node: &str| {
            run.results.nodes.iter().find(|n| n.node_id == node).unwrap().offered
        };
        assert_eq!(offered(&a, "validator-1"), 0);
        assert!(offered(&b, "validator-1") > 0);
        assert_eq!(a.results.emitted, 600);
        assert_eq!(b.results.emitted, 600);
        assert!(a.results.is_conserved() && b.results.is_conserved());
    }

    #[tokio::test]
    async fn test_stopping_one_run_leaves_the_other() {
        let orch = orchestrator();
        let a = orch.start_network_test("minimal-3", ramp_then_sustain()).unwrap();
        let b = orch.start_network_test("minimal-3", ramp_then_sustain()).unwrap();

        assert!(orch.stop_test(a.id));
        let a = orch.wait_for(a.id).await.unwrap();
        let b = orch.wait_for(b.id).await.unwrap();
        assert_eq!(a.status, RunStatus::Stopped);
        assert_eq!(b.status, RunStatus::Completed);
        assert_eq!(b.results.emitted, 1275);
    }

    #[tokio::test]
    async fn test_same_seed_same_results() {
        let orch = orchestrator();
        let scenario = Scenario::from_profile("spike").with_seed(99);
        let a = orch.start_network_test("multi-region-6", scenario.clone()).unwrap();
        let b = orch.start_network_test("multi-region-6", scenario).unwrap();

        let a = orch.wait_for(a.id).await.unwrap();
        let b = orch.wait_for(b.id).await.unwrap();
        assert_eq!(a.seed, 99);
        assert_eq!(a.results, b.results);
    }

    struct Exploding;

    impl TransactionSource for Exploding {
        fn next_batch(&mut self, _count: usize) -> Result<Vec<Transaction>, HarnessError> {
            Err(HarnessError::fault("node simulator lost its queue"))
        }
    }

    #[tokio::test]
    async fn test_internal_fault_is_retained_in_history() {
        let orch = orchestrator();
        let topology = orch.registry.get_topology("minimal-3").unwrap();
        let scenario = ramp_then_sustain();
        let resolved = scenario.resolve(&orch.catalog, &topology).unwrap();

        let id = RunId::new();
        let (control, inbox) = control_channel(id);
        let record = TestRun {
            id,
            topology_id: topology.id.clone(),
            scenario,
            status: RunStatus::Running,
            seed: 1,
            started_at_ms: 0,
            stopped_at_ms: None,
            results: TestResults::default(),
            failure_reason: None,
        };
        let runner =
            TestRunner::new(record, resolved, &topology, inbox, &orch.config).with_source(Box::new(Exploding));
        orch.launch(runner, control);

        let run = orch.wait_for(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.failure_reason.unwrap().contains("lost its queue"));
        assert_eq!(orch.test_history(None).len(), 1);
    }

    struct Panicking {
        calls: usize,
    }

    impl TransactionSource for Panicking {
        fn next_batch(&mut self, count: usize) -> Result<Vec<Transaction>, HarnessError> {
            self.calls += 1;
            if self.calls > 2 {
                panic!("batch of {} overflowed", count);
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_panicking_tick_fails_the_run() {
        let orch = orchestrator();
        let topology = orch.registry.get_topology("minimal-3").unwrap();
        let scenario = Scenario::from_phases(vec![Phase::new("flat", 10.0, 0.0, 0.0)]);
        let resolved = scenario.resolve(&orch.catalog, &topology).unwrap();

        let id = RunId::new();
        let (control, inbox) = control_channel(id);
        let record = TestRun {
            id,
            topology_id: topology.id.clone(),
            scenario,
            status: RunStatus::Running,
            seed: 1,
            started_at_ms: 0,
            stopped_at_ms: None,
            results: TestResults::default(),
            failure_reason: None,
        };
        let runner = TestRunner::new(record, resolved, &topology, inbox, &orch.config)
            .with_source(Box::new(Panicking { calls: 0 }));
        orch.launch(runner, control);

        let run = orch.wait_for(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let reason = run.failure_reason.unwrap();
        assert!(reason.contains("batch of 0 overflowed"), "{}", reason);
        assert_eq!(run.results.ticks, 3);
        assert!(orch.running_tests().is_empty());
        assert_eq!(orch.test_history(None).len(), 1);
    }

    #[tokio::test]
    async fn test_absurd_rate_is_rejected_up_front() {
        let orch = orchestrator();
        let flood = Scenario::from_phases(vec![Phase::new("flood", 10.0, 0.0, 1e18)]);

        assert!(matches!(
            orch.start_network_test("minimal-3", flood),
            Err(HarnessError::InvalidScenario(_))
        ));
        assert_eq!(orch.active_count(), 0);
        assert!(orch.test_history(None).is_empty());
    }

    #[tokio::test]
    async fn test_tick_above_batch_cap_fails_and_is_recorded() {
        let orch = TestOrchestrator::new(
            SimContext::shared(42),
            Arc::new(TopologyRegistry::with_builtins()),
            Arc::new(WorkloadCatalog::with_builtins()),
            Arc::new(InMemoryHistory::new()),
            Arc::new(SeedProvider::new()),
            HarnessConfig {
                max_batch_size: 100,
                ..Default::default()
            },
        );
        let heavy = Scenario::from_phases(vec![Phase::new("heavy", 5.0, 0.0, 5_000.0)]);

        let run = orch.start_network_test("minimal-3", heavy).unwrap();
        let done = orch.wait_for(run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        assert!(done.failure_reason.unwrap().contains("per-tick cap of 100"));
        assert_eq!(done.results.emitted, 0);
        assert_eq!(orch.test_history(None).len(), 1);
    }

    #[tokio::test]
    async fn test_run_timestamps_ignore_other_sleepers() {
        let ctx = SimContext::shared(42);
        let config = HarnessConfig {
            wall_tick_ms: 1000,
            ..Default::default()
        };
        let orch = TestOrchestrator::new(
            Arc::clone(&ctx),
            Arc::new(TopologyRegistry::with_builtins()),
            Arc::new(WorkloadCatalog::with_builtins()),
            Arc::new(InMemoryHistory::new()),
            Arc::new(SeedProvider::new()),
            config,
        );

        let a = orch.start_network_test("minimal-3", ramp_then_sustain()).unwrap();
        let b = orch.start_network_test("minimal-3", ramp_then_sustain()).unwrap();
        let a = orch.wait_for(a.id).await.unwrap();
        let b = orch.wait_for(b.id).await.unwrap();

        // 30 ticks, with a 1s pause between consecutive ones
        for run in [&a, &b] {
            assert_eq!(run.stopped_at_ms, Some(run.started_at_ms + 29_000));
        }
        assert_eq!(ctx.now(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_inject_fault_validation() {
        let orch = orchestrator();
        let run = orch.start_network_test("minimal-3", ramp_then_sustain()).unwrap();

        assert!(matches!(
            orch.inject_fault(run.id, FaultDirective::new("ghost", NodeStatus::Down, 0.0)),
            Err(HarnessError::NodeNotFound(_))
        ));
        orch.inject_fault(run.id, FaultDirective::new("validator-2", NodeStatus::Degraded, 0.0))
            .unwrap();

        let done = orch.wait_for(run.id).await.unwrap();
        assert_eq!(done.results.faults.len(), 1);
        assert!(matches!(
            orch.inject_fault(run.id, FaultDirective::new("validator-2", NodeStatus::Down, 0.0)),
            Err(HarnessError::TestNotFound(_))
        ));
    }
}
