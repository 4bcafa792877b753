//! Generation tracker - load-only runs of a profile, without a topology.

use crate::active::{epoch_millis, panic_message, ActiveRuns, Publisher};
use crate::config::HarnessConfig;
use crate::load_engine::LoadProfileEngine;
use crate::runner::{batch_cap_exceeded, MixSource, StepOutcome, TransactionSource};
use crate::seeds::SeedProvider;

use netharness_core::behavior::UserBehavior;
use netharness_core::catalog::WorkloadCatalog;
use netharness_core::error::HarnessError;
use netharness_core::history::{HistoryEntry, HistoryRepository};
use netharness_core::pattern::TransactionPattern;
use netharness_core::profile::{LoadProfile, LoadProfileSpec, Phase};
use netharness_core::records::{Generation, RunStatus};
use netharness_core::synthesizer::BehaviorMix;
use netharness_core::topology::TopologyRegistry;
use netharness_env::{control_channel, ControlHandle, ControlInbox, ControlMessage, HarnessContext, RunId};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Longest single wait while a generation is queued, so stops stay prompt.
const QUEUE_POLL: Duration = Duration::from_millis(100);

/// Options for `generate_load`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    /// Regions to spread traffic over; empty means every known region
    #[serde(default)]
    pub regions: Vec<String>,
    /// Replaces the profile's pattern with an equal mix of these behaviors
    #[serde(default)]
    pub user_behaviors: Vec<String>,
    /// Merged into the mix at equal share
    #[serde(default)]
    pub custom_patterns: Vec<TransactionPattern>,
    /// Scheduled start (ms since UNIX epoch); later than now means queued
    #[serde(default, rename = "startTime")]
    pub start_time_ms: Option<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Drives one generation through its profile.
pub struct GenerationRunner {
    record: Generation,
    engine: LoadProfileEngine,
    source: Box<dyn TransactionSource>,
    inbox: ControlInbox<()>,
    tick_secs: f64,
    max_batch: u64,
}

impl GenerationRunner {
    pub fn new(record: Generation, phases: Vec<Phase>, mix: BehaviorMix, inbox: ControlInbox<()>, config: &HarnessConfig) -> Self {
        let source = MixSource::new(mix, record.regions.clone(), record.seed);
        Self {
            engine: LoadProfileEngine::new(phases),
            source: Box::new(source),
            inbox,
            tick_secs: config.tick().as_secs_f64(),
            max_batch: config.max_batch_size,
            record,
        }
    }

    pub fn with_source(mut self, source: Box<dyn TransactionSource>) -> Self {
        self.source = source;
        self
    }

    pub fn snapshot(&self) -> Generation {
        self.record.clone()
    }

    pub fn into_record(self) -> Generation {
        self.record
    }

    fn stop_requested(&mut self) -> bool {
        self.inbox
            .drain()
            .into_iter()
            .any(|message| matches!(message, ControlMessage::Stop))
    }

    /// Handles the queued state: starts the generation once `now_ms` reaches
    /// its start time, or stops it if asked to.
    ///
    /// Returns the time left to wait, or `None` once the generation has left
    /// the queue.
    pub fn poll_queue(&mut self, now_ms: u64) -> Option<Duration> {
        if self.record.status != RunStatus::Queued {
            return None;
        }
        if self.stop_requested() {
            self.finish(RunStatus::Stopped, None, now_ms);
            return None;
        }
        if now_ms >= self.record.start_time_ms {
            self.record.status = RunStatus::Running;
            self.record.started_at_ms = Some(now_ms);
            info!("Generation {} started", self.record.id);
            return None;
        }
        Some(Duration::from_millis(self.record.start_time_ms - now_ms))
    }

    /// Advances a running generation by one tick.
    pub fn step(&mut self, now_ms: u64) -> StepOutcome {
        match self.record.status {
            status if status.is_terminal() => return StepOutcome::Finished(status),
            RunStatus::Queued => return StepOutcome::Continue,
            _ => {}
        }

        if self.stop_requested() {
            return self.finish(RunStatus::Stopped, None, now_ms);
        }

        let Some(plan) = self.engine.tick(self.tick_secs) else {
            return self.finish(RunStatus::Completed, None, now_ms);
        };

        if plan.transactions > self.max_batch {
            return self.fail(batch_cap_exceeded(plan.transactions, self.max_batch), now_ms);
        }
        let batch = match self.source.next_batch(plan.transactions as usize) {
            Ok(batch) => batch,
            Err(e) => return self.fail(e.to_string(), now_ms),
        };
        let emitted = batch.len() as u64;
        let errors = plan.transactions.saturating_sub(emitted);
        self.engine.record(&plan, emitted, errors);
        self.record.total_transactions += emitted;
        self.record.total_errors += errors;
        self.record.phases = self.engine.metrics().to_vec();

        if plan.completes {
            let status = if self.stop_requested() {
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

    /// Fails the generation from outside a tick. No-op once terminal.
    pub fn abort(&mut self, reason: String, now_ms: u64) -> StepOutcome {
        if self.record.status.is_terminal() {
            return StepOutcome::Finished(self.record.status);
        }
        self.fail(reason, now_ms)
    }

    fn finish(&mut self, status: RunStatus, reason: Option<String>, now_ms: u64) -> StepOutcome {
        if status == RunStatus::Stopped {
            self.engine.stop();
        }
        self.record.status = status;
        self.record.finished_at_ms = Some(now_ms);
        self.record.failure_reason = reason;
        self.record.phases = self.engine.metrics().to_vec();

        match status {
            RunStatus::Failed => warn!(
                "Generation {} failed: {}",
                self.record.id,
                self.record.failure_reason.as_deref().unwrap_or("unknown")
            ),
            _ => info!(
                "Generation {} {} ({} transactions)",
                self.record.id, status, self.record.total_transactions
            ),
        }
        StepOutcome::Finished(status)
    }
}

/// Tracks load generations and exposes the workload catalog.
pub struct GenerationTracker<C: HarnessContext> {
    ctx: Arc<C>,
    registry: Arc<TopologyRegistry>,
    catalog: Arc<WorkloadCatalog>,
    history: Arc<dyn HistoryRepository>,
    seeds: Arc<SeedProvider>,
    config: HarnessConfig,
    runs: Arc<ActiveRuns<Generation, ()>>,
}

impl<C: HarnessContext> GenerationTracker<C> {
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

    /// Starts (or schedules) a generation of `profile_id`.
    ///
    /// Fails with `ProfileNotFound` for an unknown profile and with
    /// `InvalidPattern` for an unresolvable mix; no record is created in
    /// either case.
    pub fn generate_load(&self, profile_id: &str, options: GenerationOptions) -> Result<Generation, HarnessError> {
        let profile = self
            .catalog
            .get_profile(profile_id)
            .ok_or_else(|| HarnessError::ProfileNotFound(profile_id.to_string()))?;

        let mix = self
            .catalog
            .resolve_mix(Some(&profile.pattern_id), &options.user_behaviors, &options.custom_patterns)
            .map_err(|e| {
                warn!("Rejected generation of {}: {}", profile_id, e);
                e
            })?;

        let regions = if options.regions.is_empty() {
            self.known_regions()
        } else {
            options.regions.clone()
        };

        let now_ms = epoch_millis(self.ctx.system_time());
        let start_time_ms = options.start_time_ms.unwrap_or(now_ms);
        let queued = start_time_ms > now_ms;

        let id = RunId::new();
        let record = Generation {
            id,
            profile_id: profile.id.clone(),
            regions,
            user_behaviors: options.user_behaviors,
            custom_patterns: options.custom_patterns,
            status: if queued { RunStatus::Queued } else { RunStatus::Running },
            seed: self.seeds.next_seed(self.ctx.as_ref(), options.seed),
            start_time_ms,
            started_at_ms: if queued { None } else { Some(now_ms) },
            finished_at_ms: None,
            phases: Vec::new(),
            total_transactions: 0,
            total_errors: 0,
            failure_reason: None,
        };

        info!(
            "Generation {} of '{}' {} (seed={})",
            id,
            profile.id,
            if queued { "queued" } else { "started" },
            record.seed
        );

        let (control, inbox) = control_channel(id);
        let runner = GenerationRunner::new(record.clone(), profile.phases, mix, inbox, &self.config);
        self.launch(runner, control);
        Ok(record)
    }

    fn launch(&self, runner: GenerationRunner, control: ControlHandle<()>) {
        let initial = runner.snapshot();
        let id = initial.id;
        let publisher = self.runs.insert(id, control, initial);

        let driver = GenerationDriver {
            ctx: Arc::new(self.ctx.fork()),
            runner,
            publisher,
            runs: Arc::clone(&self.runs),
            history: Arc::clone(&self.history),
            wall_tick: self.config.wall_tick(),
        };
        self.ctx.spawn(&format!("generation-{}", id), driver.run());
    }

    /// Every region of every registered topology, in registration order.
    fn known_regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = Vec::new();
        for topology in self.registry.list_topologies() {
            for region in topology.regions() {
                if !regions.contains(&region) {
                    regions.push(region);
                }
            }
        }
        regions
    }

    /// Requests a stop; false for unknown, finished or already-stopping runs.
    pub fn stop_generation(&self, id: RunId) -> bool {
        let Some(snapshot) = self.runs.get(id) else {
            return false;
        };
        if snapshot.status.is_terminal() {
            return false;
        }
        match self.runs.control(id).map(|c| c.request_stop()) {
            Some(Ok(true)) => {
                info!("Stop requested for generation {}", id);
                true
            }
            Some(Err(e)) => {
                debug!("stop_generation: {}", e);
                false
            }
            _ => false,
        }
    }

    /// Queued and running generations, oldest first.
    pub fn active_generations(&self) -> Vec<Generation> {
        let mut active: Vec<Generation> = self
            .runs
            .snapshots()
            .into_iter()
            .filter(|g| !g.status.is_terminal())
            .collect();
        active.sort_by(|a, b| a.start_time_ms.cmp(&b.start_time_ms).then(a.id.cmp(&b.id)));
        active
    }

    pub fn generation_history(&self) -> Vec<Generation> {
        self.history.generations()
    }

    pub fn get_generation(&self, id: RunId) -> Option<Generation> {
        self.runs
            .get(id)
            .or_else(|| self.history.generations().into_iter().find(|g| g.id == id))
    }

    /// Waits for a generation to finish and returns its final record.
    pub async fn wait_for(&self, id: RunId) -> Option<Generation> {
        self.runs.wait_done(id).await;
        self.get_generation(id)
    }

    pub fn create_custom_load_profile(&self, spec: LoadProfileSpec) -> Result<LoadProfile, HarnessError> {
        let profile = self.catalog.create_custom_load_profile(spec)?;
        info!("Registered load profile {} ({})", profile.id, profile.name);
        Ok(profile)
    }

    pub fn list_profiles(&self) -> Vec<LoadProfile> {
        self.catalog.list_profiles()
    }

    pub fn list_patterns(&self) -> Vec<TransactionPattern> {
        self.catalog.list_patterns()
    }

    pub fn list_user_behaviors(&self) -> Vec<UserBehavior> {
        self.catalog.list_user_behaviors()
    }
}

/// The task that owns a generation.
struct GenerationDriver<C: HarnessContext> {
    ctx: Arc<C>,
    runner: GenerationRunner,
    publisher: Publisher<Generation>,
    runs: Arc<ActiveRuns<Generation, ()>>,
    history: Arc<dyn HistoryRepository>,
    wall_tick: Duration,
}

impl<C: HarnessContext> GenerationDriver<C> {
    async fn run(self) {
        let GenerationDriver {
            ctx,
            mut runner,
            publisher,
            runs,
            history,
            wall_tick,
        } = self;

        while let Some(wait) = runner.poll_queue(epoch_millis(ctx.system_time())) {
            ctx.sleep(wait.min(QUEUE_POLL)).await;
        }
        publisher.publish(runner.snapshot());

        loop {
            let now_ms = epoch_millis(ctx.system_time());
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| runner.step(now_ms))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!("Generation {}: {}", runner.snapshot().id, reason);
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
        match history.append(HistoryEntry::Generation(record)) {
            Ok(()) => runs.remove(id),
            Err(e) => error!("Failed to record generation {}: {}", id, e),
        }
        publisher.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use netharness_core::history::InMemoryHistory;
    use netharness_core::profile::OverallSummary;
    use netharness_core::transaction::Transaction;

    fn tracker_with(ctx: Arc<SimContext>) -> GenerationTracker<SimContext> {
        GenerationTracker::new(
            ctx,
            Arc::new(TopologyRegistry::with_builtins()),
            Arc::new(WorkloadCatalog::with_builtins()),
            Arc::new(InMemoryHistory::new()),
            Arc::new(SeedProvider::new()),
            HarnessConfig::default(),
        )
    }

    fn tracker() -> GenerationTracker<SimContext> {
        tracker_with(SimContext::shared(42))
    }

    fn short_profile(tracker: &GenerationTracker<SimContext>) -> LoadProfile {
        tracker
            .create_custom_load_profile(LoadProfileSpec {
                name: "short".into(),
                description: None,
                duration_secs: 30.0,
                phases: vec![Phase::new("ramp", 10.0, 5.0, 50.0), Phase::new("sustain", 20.0, 0.0, 50.0)],
                overall: OverallSummary {
                    total_duration_secs: 30.0,
                    peak_tps: 50.0,
                },
                pattern_id: None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_generation_runs_to_completion() {
        let tracker = tracker();
        let profile = short_profile(&tracker);

        let generation = tracker.generate_load(&profile.id, GenerationOptions::default()).unwrap();
        assert_eq!(generation.status, RunStatus::Running);
        assert!(!generation.regions.is_empty());

        let done = tracker.wait_for(generation.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.total_transactions, 1275);
        assert_eq!(done.phases.len(), 2);
        assert_eq!(tracker.generation_history().len(), 1);
        assert!(tracker.active_generations().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_profile_creates_nothing() {
        let tracker = tracker();
        let before = tracker.active_generations().len();

        let result = tracker.generate_load("no-such-profile", GenerationOptions::default());
        assert!(matches!(result, Err(HarnessError::ProfileNotFound(_))));
        assert_eq!(tracker.active_generations().len(), before);
        assert!(tracker.generation_history().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_behavior_is_rejected() {
        let tracker = tracker();
        let options = GenerationOptions {
            user_behaviors: vec!["ghost".into()],
            ..Default::default()
        };
        assert!(matches!(
            tracker.generate_load("spike", options),
            Err(HarnessError::InvalidPattern(_))
        ));
        assert!(tracker.active_generations().is_empty());
    }

    #[tokio::test]
    async fn test_future_start_is_queued() {
        let ctx = SimContext::shared(42);
        let tracker = tracker_with(Arc::clone(&ctx));
        let profile = short_profile(&tracker);

        let start = epoch_millis(ctx.system_time()) + 60_000;
        let options = GenerationOptions {
            start_time_ms: Some(start),
            regions: vec!["eu-west".into()],
            ..Default::default()
        };
        let generation = tracker.generate_load(&profile.id, options).unwrap();
        assert_eq!(generation.status, RunStatus::Queued);
        assert_eq!(tracker.active_generations()[0].status, RunStatus::Queued);

        let done = tracker.wait_for(generation.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert!(done.started_at_ms.unwrap() >= start);
        assert_eq!(done.regions, vec!["eu-west".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_queued_generation() {
        let ctx = SimContext::shared(42);
        let tracker = tracker_with(Arc::clone(&ctx));
        let start = epoch_millis(ctx.system_time()) + 3_600_000;
        let options = GenerationOptions {
            start_time_ms: Some(start),
            ..Default::default()
        };

        let generation = tracker.generate_load("stress", options).unwrap();
        assert!(tracker.stop_generation(generation.id));
        assert!(!tracker.stop_generation(generation.id));

        let done = tracker.wait_for(generation.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Stopped);
        assert_eq!(done.total_transactions, 0);
        assert!(done.started_at_ms.is_none());
    }

    #[tokio::test]
    async fn test_custom_behaviors_shape_the_mix() {
        let tracker = tracker();
        let profile = short_profile(&tracker);
        let options = GenerationOptions {
            user_behaviors: vec!["staker".into()],
            seed: Some(5),
            ..Default::default()
        };
        let generation = tracker.generate_load(&profile.id, options).unwrap();
        let done = tracker.wait_for(generation.id).await.unwrap();
        assert_eq!(done.seed, 5);
        assert_eq!(done.user_behaviors, vec!["staker".to_string()]);
        assert_eq!(done.total_transactions, 1275);
    }

    struct Panicking;

    impl TransactionSource for Panicking {
        fn next_batch(&mut self, _count: usize) -> Result<Vec<Transaction>, HarnessError> {
            panic!("synthesizer state corrupted")
        }
    }

    #[tokio::test]
    async fn test_panicking_tick_fails_the_generation() {
        let tracker = tracker();
        let profile = short_profile(&tracker);
        let mix = tracker.catalog.default_mix().unwrap();

        let id = RunId::new();
        let (control, inbox) = control_channel(id);
        let record = Generation {
            id,
            profile_id: profile.id.clone(),
            regions: vec!["us-east".into()],
            user_behaviors: Vec::new(),
            custom_patterns: Vec::new(),
            status: RunStatus::Running,
            seed: 3,
            start_time_ms: 0,
            started_at_ms: Some(0),
            finished_at_ms: None,
            phases: Vec::new(),
            total_transactions: 0,
            total_errors: 0,
            failure_reason: None,
        };
        let runner = GenerationRunner::new(record, profile.phases, mix, inbox, &HarnessConfig::default())
            .with_source(Box::new(Panicking));
        tracker.launch(runner, control);

        let done = tracker.wait_for(id).await.unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        assert!(done.failure_reason.unwrap().contains("synthesizer state corrupted"));
        assert!(done.finished_at_ms.is_some());
        assert!(tracker.active_generations().is_empty());
        assert_eq!(tracker.generation_history().len(), 1);
    }

    #[tokio::test]
    async fn test_tick_above_batch_cap_fails_the_generation() {
        let tracker = GenerationTracker::new(
            SimContext::shared(42),
            Arc::new(TopologyRegistry::with_builtins()),
            Arc::new(WorkloadCatalog::with_builtins()),
            Arc::new(InMemoryHistory::new()),
            Arc::new(SeedProvider::new()),
            HarnessConfig {
                max_batch_size: 40,
                ..Default::default()
            },
        );
        let profile = short_profile(&tracker);

        let generation = tracker.generate_load(&profile.id, GenerationOptions::default()).unwrap();
        let done = tracker.wait_for(generation.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        assert!(done.failure_reason.unwrap().contains("per-tick cap of 40"));
        // Ramp ticks of 5..=40 fit, the ninth asks for 45
        assert_eq!(done.total_transactions, (1..=8).map(|i| i * 5).sum::<u64>());
        assert_eq!(tracker.generation_history().len(), 1);
    }

    #[test]
    fn test_absurd_custom_profile_is_rejected() {
        let tracker = tracker();
        let before = tracker.list_profiles().len();
        let result = tracker.create_custom_load_profile(LoadProfileSpec {
            name: "flood".into(),
            description: None,
            duration_secs: 10.0,
            phases: vec![Phase::new("flood", 10.0, 0.0, 1e18)],
            overall: OverallSummary {
                total_duration_secs: 10.0,
                peak_tps: 1e18,
            },
            pattern_id: None,
        });
        assert!(matches!(result, Err(HarnessError::InvalidLoadProfile(_))));
        assert_eq!(tracker.list_profiles().len(), before);
    }

    #[tokio::test]
    async fn test_queued_generation_leaves_test_clock_alone() {
        let ctx = SimContext::shared(42);
        let harness = crate::harness::Harness::new(HarnessConfig::default(), Arc::clone(&ctx)).unwrap();
        let start = epoch_millis(ctx.system_time()) + 60_000;
        let queued = harness
            .generations
            .generate_load(
                "spike",
                GenerationOptions {
                    start_time_ms: Some(start),
                    ..Default::default()
                },
            )
            .unwrap();

        let scenario = netharness_core::scenario::Scenario::from_profile("steady-state").with_seed(4);
        let run = harness.orchestrator.start_network_test("minimal-3", scenario).unwrap();
        let run = harness.orchestrator.wait_for(run.id).await.unwrap();
        // No wall tick: every tick of the run happens at its start time
        assert_eq!(run.stopped_at_ms, Some(run.started_at_ms));

        let generation = harness.generations.wait_for(queued.id).await.unwrap();
        assert_eq!(generation.status, RunStatus::Completed);
        assert!(generation.started_at_ms.unwrap() >= start);
    }

    #[test]
    fn test_catalog_passthrough() {
        let tracker = tracker();
        assert_eq!(tracker.list_profiles().len(), 4);
        assert_eq!(tracker.list_patterns().len(), 3);
        assert_eq!(tracker.list_user_behaviors().len(), 5);
        assert!(tracker.get_generation(RunId::new()).is_none());
    }

    #[test]
    fn test_options_json() {
        let options: GenerationOptions = serde_json::from_value(serde_json::json!({
            "regions": ["us-east"],
            "userBehaviors": ["defi-trader"],
            "startTime": 1700000000000u64
        }))
        .unwrap();
        assert_eq!(options.start_time_ms, Some(1_700_000_000_000));
        assert_eq!(options.user_behaviors, vec!["defi-trader".to_string()]);
    }
}
