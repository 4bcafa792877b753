//! Test runner - drives one scenario against one topology, tick by tick.

use crate::config::HarnessConfig;
use crate::load_engine::{EngineState, LoadProfileEngine};
use crate::network::RunNetwork;
use crate::node::NodeModel;

use netharness_core::error::HarnessError;
use netharness_core::records::{FaultRecord, RunStatus, TestResults, TestRun};
use netharness_core::scenario::{FaultDirective, ResolvedScenario};
use netharness_core::synthesizer::{BehaviorMix, Synthesizer};
use netharness_core::topology::Topology;
use netharness_core::transaction::Transaction;
use netharness_env::{ControlInbox, ControlMessage};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

/// Produces the transactions a tick asked for.
pub trait TransactionSource: Send {
    fn next_batch(&mut self, count: usize) -> Result<Vec<Transaction>, HarnessError>;
}

/// The normal source: a seeded synthesizer over a behavior mix.
pub struct MixSource {
    synthesizer: Synthesizer,
    mix: BehaviorMix,
}

impl MixSource {
    pub fn new(mix: BehaviorMix, regions: Vec<String>, seed: u64) -> Self {
        Self {
            synthesizer: Synthesizer::new(ChaCha8Rng::seed_from_u64(seed)).with_regions(regions),
            mix,
        }
    }
}

impl TransactionSource for MixSource {
    fn next_batch(&mut self, count: usize) -> Result<Vec<Transaction>, HarnessError> {
        self.synthesizer.synthesize(&self.mix, count)
    }
}

/// Failure reason for a tick that asks for more than `cap` transactions.
pub(crate) fn batch_cap_exceeded(requested: u64, cap: u64) -> String {
    HarnessError::fault(format!(
        "tick requested {} transactions, above the per-tick cap of {}",
        requested, cap
    ))
    .to_string()
}

/// Requests a test run accepts while it is in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum RunDirective {
    /// Apply a status change now (or at `at_secs` if that is later)
    InjectFault(FaultDirective),
}

/// Result of one `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Finished(RunStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultState {
    Pending,
    /// In force; index into the run's fault records
    Active(usize),
    Done,
}

#[derive(Debug, Clone)]
struct ScheduledFault {
    directive: FaultDirective,
    state: FaultState,
}

impl ScheduledFault {
    fn new(directive: FaultDirective) -> Self {
        Self {
            directive,
            state: FaultState::Pending,
        }
    }
}

/// Owns every piece of mutable state of one test run.
///
/// Only the runner writes to its record; callers see copies through
/// `snapshot`.
pub struct TestRunner {
    record: TestRun,
    engine: LoadProfileEngine,
    source: Box<dyn TransactionSource>,
    network: RunNetwork,
    inbox: ControlInbox<RunDirective>,
    schedule: Vec<ScheduledFault>,
    faults: Vec<FaultRecord>,
    tick_secs: f64,
    max_batch: u64,
    emitted: u64,
}

impl TestRunner {
    /// Builds a runner for an already validated scenario.
    ///
    /// `record` must be in `Running`; its seed feeds the synthesizer.
    pub fn new(
        record: TestRun,
        resolved: ResolvedScenario,
        topology: &Topology,
        inbox: ControlInbox<RunDirective>,
        config: &HarnessConfig,
    ) -> Self {
        let source = MixSource::new(resolved.mix, resolved.regions, record.seed);
        let schedule = resolved
            .faults
            .into_iter()
            .map(ScheduledFault::new)
            .collect();

        Self {
            engine: LoadProfileEngine::new(resolved.phases),
            source: Box::new(source),
            network: RunNetwork::new(topology, NodeModel::from(config)),
            inbox,
            schedule,
            faults: Vec::new(),
            tick_secs: config.tick().as_secs_f64(),
            max_batch: config.max_batch_size,
            emitted: 0,
            record,
        }
    }

    /// Replaces the transaction source.
    pub fn with_source(mut self, source: Box<dyn TransactionSource>) -> Self {
        self.source = source;
        self
    }

    pub fn status(&self) -> RunStatus {
        self.record.status
    }

    /// Copy of the run as it stands.
    pub fn snapshot(&self) -> TestRun {
        self.record.clone()
    }

    /// Consumes the runner, returning the final record.
    pub fn into_record(self) -> TestRun {
        self.record
    }

    /// Advances the run by one tick.
    ///
    /// Control messages are applied first, so a stop requested before the
    /// tick prevents it. A stop that arrives while the final tick runs still
    /// wins over completion.
    pub fn step(&mut self, now_ms: u64) -> StepOutcome {
        if self.record.status.is_terminal() {
            return StepOutcome::Finished(self.record.status);
        }

        if self.drain_control() {
            return self.finish(RunStatus::Stopped, None, now_ms);
        }
        self.apply_due_faults();

        let Some(plan) = self.engine.tick(self.tick_secs) else {
            return match self.engine.state() {
                EngineState::Completed => self.finish(RunStatus::Completed, None, now_ms),
                _ => self.finish(RunStatus::Failed, Some("engine halted unexpectedly".into()), now_ms),
            };
        };

        if plan.transactions > self.max_batch {
            let reason = batch_cap_exceeded(plan.transactions, self.max_batch);
            return self.fail(reason, now_ms);
        }
        let batch = match self.source.next_batch(plan.transactions as usize) {
            Ok(batch) if batch.len() as u64 == plan.transactions => batch,
            Ok(batch) => {
                let reason = format!("source produced {} of {} transactions", batch.len(), plan.transactions);
                return self.fail(reason, now_ms);
            }
            Err(e) => return self.fail(e.to_string(), now_ms),
        };

        let report = self.network.deliver(&batch, plan.slice_secs);
        self.emitted += report.offered;
        self.engine.record(&plan, report.offered, report.dropped);
        self.refresh_results();

        if plan.completes {
            let status = if self.drain_control() {
                RunStatus::Stopped
            } else {
                RunStatus::Completed
            };
            return self.finish(status, None, now_ms);
        }
        StepOutcome::Continue
    }

    fn fail(&mut self, reason: String, now_ms: u64) -> StepOutcome {
        self.engine.fail();
        self.finish(RunStatus::Failed, Some(reason), now_ms)
    }

    /// Fails the run from outside a tick, e.g. after `step` panicked.
    ///
    /// Does nothing once the run is terminal.
    pub fn abort(&mut self, reason: String, now_ms: u64) -> StepOutcome {
        if self.record.status.is_terminal() {
            return StepOutcome::Finished(self.record.status);
        }
        self.fail(reason, now_ms)
    }

    /// Applies pending directives; returns true if a stop was requested.
    fn drain_control(&mut self) -> bool {
        let mut stop = false;
        for message in self.inbox.drain() {
            match message {
                ControlMessage::Stop => stop = true,
                ControlMessage::Directive(RunDirective::InjectFault(mut directive)) => {
                    directive.at_secs = directive.at_secs.max(self.engine.elapsed_secs());
                    info!(
                        "Run {}: fault queued for {} ({:?} at {:.1}s)",
                        self.record.id, directive.node_id, directive.status, directive.at_secs
                    );
                    self.schedule.push(ScheduledFault::new(directive));
                }
            }
        }
        stop
    }

    /// Applies and reverts scheduled faults whose time has come.
    fn apply_due_faults(&mut self) {
        let now = self.engine.elapsed_secs();
        for scheduled in &mut self.schedule {
            let directive = &scheduled.directive;

            if scheduled.state == FaultState::Pending && now + 1e-9 >= directive.at_secs {
                scheduled.state = match self.network.set_status(&directive.node_id, directive.status) {
                    Ok(_) => {
                        info!(
                            "Run {}: {} -> {:?} at {:.1}s",
                            self.record.id, directive.node_id, directive.status, now
                        );
                        self.faults.push(FaultRecord {
                            node_id: directive.node_id.clone(),
                            status: directive.status,
                            applied_at_secs: now,
                            reverted_at_secs: None,
                        });
                        FaultState::Active(self.faults.len() - 1)
                    }
                    Err(e) => {
                        warn!("Run {}: ignoring fault: {}", self.record.id, e);
                        FaultState::Done
                    }
                };
            }

            let FaultState::Active(index) = scheduled.state else { continue };
            let Some(duration) = directive.duration_secs else { continue };
            if now + 1e-9 >= directive.at_secs + duration {
                if self.network.reset_status(&directive.node_id).is_ok() {
                    debug!("Run {}: {} reverted at {:.1}s", self.record.id, directive.node_id, now);
                }
                if let Some(fault) = self.faults.get_mut(index) {
                    fault.reverted_at_secs = Some(now);
                }
                scheduled.state = FaultState::Done;
            }
        }
    }

    fn refresh_results(&mut self) {
        let results = &mut self.record.results;
        results.ticks = self.engine.ticks();
        results.elapsed_secs = self.engine.elapsed_secs();
        results.emitted = self.emitted;
        results.processed = self.network.processed();
        results.dropped = self.network.dropped();
        results.queued = self.network.queued();
        results.avg_latency_ms = self.network.avg_latency_ms();
        results.phases = self.engine.metrics().to_vec();
        results.nodes = self.network.node_results();
        results.links = self.network.link_results();
        results.faults = self.faults.clone();
    }

    /// Freezes the run. Faults still in force revert here.
    fn finish(&mut self, status: RunStatus, reason: Option<String>, now_ms: u64) -> StepOutcome {
        if status == RunStatus::Stopped {
            self.engine.stop();
        }

        let now = self.engine.elapsed_secs();
        for scheduled in &mut self.schedule {
            if let FaultState::Active(index) = scheduled.state {
                if let Some(fault) = self.faults.get_mut(index) {
                    fault.reverted_at_secs = Some(now);
                }
            }
            scheduled.state = FaultState::Done;
        }

        // Node results keep the status observed at the end of the run
        self.refresh_results();

        self.record.status = status;
        self.record.stopped_at_ms = Some(now_ms);
        self.record.failure_reason = reason;

        let results: &TestResults = &self.record.results;
        match status {
            RunStatus::Failed => warn!(
                "Run {} failed after {} ticks: {}",
                self.record.id,
                results.ticks,
                self.record.failure_reason.as_deref().unwrap_or("unknown")
            ),
            _ => info!(
                "Run {} {} after {} ticks ({} emitted, {} processed, {} dropped)",
                self.record.id, status, results.ticks, results.emitted, results.processed, results.dropped
            ),
        }

        StepOutcome::Finished(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netharness_core::catalog::WorkloadCatalog;
    use netharness_core::profile::Phase;
    use netharness_core::scenario::Scenario;
    use netharness_core::topology::NodeStatus;
    use netharness_core::topology::TopologyRegistry;
    use netharness_env::{control_channel, ControlHandle, RunId};

    struct FailingSource {
        after: usize,
        calls: usize,
    }

    impl TransactionSource for FailingSource {
        fn next_batch(&mut self, count: usize) -> Result<Vec<Transaction>, HarnessError> {
            self.calls += 1;
            if self.calls > self.after {
                return Err(HarnessError::fault("synthesizer exploded"));
            }
            Ok(vec![
                Transaction {
                    id: 0,
                    tx_type: netharness_core::behavior::TransactionType::Transfer,
                    behavior: "casual-user".into(),
                    region: "us-east".into(),
                    payload_bytes: 100,
                    offset_ms: 0.0,
                };
                count
            ])
        }
    }

    fn runner(topology_id: &str, scenario: Scenario) -> (TestRunner, ControlHandle<RunDirective>) {
        runner_with(topology_id, scenario, &HarnessConfig::default())
    }

    fn runner_with(
        topology_id: &str,
        scenario: Scenario,
        config: &HarnessConfig,
    ) -> (TestRunner, ControlHandle<RunDirective>) {
        let topology = TopologyRegistry::with_builtins().get_topology(topology_id).unwrap();
        let resolved = scenario.resolve(&WorkloadCatalog::with_builtins(), &topology).unwrap();
        let id = RunId::from_seed(1);
        let (handle, inbox) = control_channel(id);
        let record = TestRun {
            id,
            topology_id: topology.id.clone(),
            scenario,
            status: RunStatus::Running,
            seed: 9,
            started_at_ms: 0,
            stopped_at_ms: None,
            results: TestResults::default(),
            failure_reason: None,
        };
        let runner = TestRunner::new(record, resolved, &topology, inbox, config);
        (runner, handle)
    }

    fn ramp_then_sustain() -> Scenario {
        Scenario::from_phases(vec![Phase::new("ramp", 10.0, 5.0, 50.0), Phase::new("sustain", 20.0, 0.0, 50.0)])
    }

    fn run_to_end(runner: &mut TestRunner) -> RunStatus {
        let mut now = 0;
        loop {
            now += 1000;
            if let StepOutcome::Finished(status) = runner.step(now) {
                return status;
            }
        }
    }

    #[test]
    fn test_ramp_sustain_conserves_transactions() {
        let (mut runner, _handle) = runner("minimal-3", ramp_then_sustain());
        assert_eq!(run_to_end(&mut runner), RunStatus::Completed);

        let run = runner.into_record();
        assert_eq!(run.results.emitted, 1275);
        assert_eq!(run.results.ticks, 30);
        assert!(run.results.is_conserved());
        assert_eq!(run.results.processed, 1275);
        assert_eq!(run.results.dropped, 0);
        assert_eq!(run.results.phases[0].transactions, 275);
        assert_eq!(run.stopped_at_ms, Some(30_000));
    }

    #[test]
    fn test_stop_before_first_tick() {
        let (mut runner, handle) = runner("minimal-3", ramp_then_sustain());
        assert!(handle.request_stop().unwrap());

        assert_eq!(runner.step(5), StepOutcome::Finished(RunStatus::Stopped));
        let run = runner.snapshot();
        assert_eq!(run.results.emitted, 0);
        assert_eq!(run.stopped_at_ms, Some(5));
        // Terminal is absorbing
        assert_eq!(runner.step(6), StepOutcome::Finished(RunStatus::Stopped));
    }

    #[test]
    fn test_stop_on_final_tick_wins() {
        let scenario = Scenario::from_phases(vec![Phase::new("short", 2.0, 0.0, 10.0)]);
        let (mut runner, handle) = runner("minimal-3", scenario);

        assert_eq!(runner.step(1), StepOutcome::Continue);
        // Lands after the control check of the final tick would have run
        let mut runner = runner.with_source(Box::new(StopOnCall {
            handle: handle.clone(),
        }));
        assert_eq!(runner.step(2), StepOutcome::Finished(RunStatus::Stopped));
        assert_eq!(runner.snapshot().results.emitted, 20);
    }

    struct StopOnCall {
        handle: ControlHandle<RunDirective>,
    }

    impl TransactionSource for StopOnCall {
        fn next_batch(&mut self, count: usize) -> Result<Vec<Transaction>, HarnessError> {
            let _ = self.handle.request_stop();
            FailingSource { after: 1, calls: 0 }.next_batch(count)
        }
    }

    #[test]
    fn test_source_failure_fails_run() {
        let (runner, _handle) = runner("minimal-3", ramp_then_sustain());
        let mut runner = runner.with_source(Box::new(FailingSource { after: 3, calls: 0 }));

        assert_eq!(run_to_end(&mut runner), RunStatus::Failed);
        let run = runner.into_record();
        assert_eq!(run.results.ticks, 4);
        assert_eq!(run.results.emitted, 5 + 10 + 15);
        assert!(run.failure_reason.unwrap().contains("synthesizer exploded"));
    }

    #[test]
    fn test_oversized_tick_fails_run() {
        let config = HarnessConfig {
            max_batch_size: 12,
            ..Default::default()
        };
        let scenario = Scenario::from_phases(vec![Phase::new("ramp", 10.0, 5.0, 50.0)]);
        let (mut runner, _handle) = runner_with("minimal-3", scenario, &config);

        // 5 then 10 fit, 15 does not
        assert_eq!(run_to_end(&mut runner), RunStatus::Failed);
        let run = runner.into_record();
        assert_eq!(run.results.ticks, 3);
        assert_eq!(run.results.emitted, 15);
        let reason = run.failure_reason.unwrap();
        assert!(reason.contains("per-tick cap of 12"), "{}", reason);
    }

    #[test]
    fn test_abort_fails_once() {
        let (mut runner, _handle) = runner("minimal-3", ramp_then_sustain());
        assert_eq!(runner.step(1000), StepOutcome::Continue);

        assert_eq!(runner.abort("worker crashed".into(), 1500), StepOutcome::Finished(RunStatus::Failed));
        assert_eq!(runner.abort("again".into(), 2000), StepOutcome::Finished(RunStatus::Failed));
        let run = runner.into_record();
        assert_eq!(run.failure_reason.as_deref(), Some("worker crashed"));
        assert_eq!(run.stopped_at_ms, Some(1500));
        assert_eq!(run.results.emitted, 5);
    }

    #[test]
    fn test_scheduled_fault_applies_and_reverts() {
        let scenario = Scenario::from_phases(vec![Phase::new("flat", 10.0, 0.0, 60.0)])
            .with_fault(FaultDirective::new("validator-1", NodeStatus::Down, 2.0).for_secs(3.0));
        let (mut runner, _handle) = runner("minimal-3", scenario);
        assert_eq!(run_to_end(&mut runner), RunStatus::Completed);

        let run = runner.into_record();
        assert_eq!(run.results.faults.len(), 1);
        let fault = &run.results.faults[0];
        assert_eq!(fault.applied_at_secs, 2.0);
        assert_eq!(fault.reverted_at_secs, Some(5.0));
        assert!(run.results.is_conserved());

        let v1 = run.results.nodes.iter().find(|n| n.node_id == "validator-1").unwrap();
        let v2 = run.results.nodes.iter().find(|n| n.node_id == "validator-2").unwrap();
        assert!(v1.offered < v2.offered);
        assert_eq!(v1.final_status, NodeStatus::Up);
    }

    #[test]
    fn test_injected_fault_holds_until_end() {
        let scenario = Scenario::from_phases(vec![Phase::new("flat", 4.0, 0.0, 30.0)]);
        let (mut runner, handle) = runner("minimal-3", scenario);

        assert_eq!(runner.step(1), StepOutcome::Continue);
        handle
            .send(RunDirective::InjectFault(FaultDirective::new("validator-3", NodeStatus::Degraded, 0.0)))
            .unwrap();
        assert_eq!(run_to_end(&mut runner), RunStatus::Completed);

        let run = runner.into_record();
        let fault = &run.results.faults[0];
        assert_eq!(fault.applied_at_secs, 1.0);
        assert_eq!(fault.reverted_at_secs, Some(4.0));
        let v3 = run.results.nodes.iter().find(|n| n.node_id == "validator-3").unwrap();
        assert_eq!(v3.final_status, NodeStatus::Degraded);
    }
}
