//! Load profile engine: a tick-driven state machine over profile phases.

use netharness_core::profile::{Phase, DURATION_EPSILON};
use netharness_core::records::PhaseMetrics;
use tracing::debug;

/// Where the engine is in its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Running { phase: usize },
    Completed,
    Stopped,
    Failed,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Completed | EngineState::Stopped | EngineState::Failed)
    }
}

/// Work requested by one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickPlan {
    /// Index of the phase this slice belongs to
    pub phase: usize,
    /// Simulated seconds covered, `min(dt, remaining phase time)`
    pub slice_secs: f64,
    /// Target rate at the end of the slice
    pub rate_tps: f64,
    /// `ceil(rate × slice)`
    pub transactions: u64,
    /// True when this tick finished the last phase
    pub completes: bool,
}

/// Walks a sequence of ramp/sustain phases one tick at a time.
///
/// ```text
/// NotStarted -> Running{0} -> ... -> Running{n-1} -> Completed
///                  |                     |
///                  +--> Stopped/Failed <-+
/// ```
#[derive(Debug, Clone)]
pub struct LoadProfileEngine {
    phases: Vec<Phase>,
    state: EngineState,
    phase_elapsed: f64,
    entry_tps: f64,
    elapsed_secs: f64,
    ticks: u64,
    requested: u64,
    metrics: Vec<PhaseMetrics>,
}

impl LoadProfileEngine {
    pub fn new(phases: Vec<Phase>) -> Self {
        let metrics = phases.iter().map(|p| PhaseMetrics::new(&p.name, p.target_tps)).collect();
        Self {
            phases,
            state: EngineState::NotStarted,
            phase_elapsed: 0.0,
            entry_tps: 0.0,
            elapsed_secs: 0.0,
            ticks: 0,
            requested: 0,
            metrics,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn current_phase(&self) -> Option<&Phase> {
        match self.state {
            EngineState::Running { phase } => self.phases.get(phase),
            _ => None,
        }
    }

    /// Simulated seconds covered so far.
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Transactions requested across all ticks.
    pub fn requested(&self) -> u64 {
        self.requested
    }

    pub fn metrics(&self) -> &[PhaseMetrics] {
        &self.metrics
    }

    /// Current target rate, for progress reporting.
    pub fn current_rate(&self) -> f64 {
        self.current_phase()
            .map(|p| p.rate_at(self.entry_tps, self.phase_elapsed))
            .unwrap_or(0.0)
    }

    /// Advances the schedule by up to `dt` seconds.
    ///
    /// A tick never crosses a phase boundary: the final slice of a phase is
    /// shortened and the next phase starts on the following tick. Returns
    /// `None` once the engine is terminal.
    pub fn tick(&mut self, dt: f64) -> Option<TickPlan> {
        if dt <= 0.0 {
            return None;
        }
        if self.state == EngineState::NotStarted {
            self.enter(0);
        }
        let EngineState::Running { phase } = self.state else {
            return None;
        };

        let current = &self.phases[phase];
        let slice = dt.min(current.duration_secs - self.phase_elapsed);
        self.phase_elapsed += slice;
        self.elapsed_secs += slice;
        self.ticks += 1;

        let rate = current.rate_at(self.entry_tps, self.phase_elapsed);
        let transactions = (rate * slice - DURATION_EPSILON).ceil().max(0.0) as u64;
        self.requested += transactions;

        if current.duration_secs - self.phase_elapsed <= DURATION_EPSILON {
            self.entry_tps = current.target_tps;
            self.enter(phase + 1);
        }

        Some(TickPlan {
            phase,
            slice_secs: slice,
            rate_tps: rate,
            transactions,
            completes: self.state == EngineState::Completed,
        })
    }

    /// Books what a tick actually emitted.
    pub fn record(&mut self, plan: &TickPlan, transactions: u64, errors: u64) {
        if let Some(metrics) = self.metrics.get_mut(plan.phase) {
            metrics.record(plan.slice_secs, transactions, errors);
        }
    }

    /// Halts the schedule.
    ///
    /// Also overrides a completion reached in the tick that is being
    /// finalized. Returns false if the engine had already failed or stopped.
    pub fn stop(&mut self) -> bool {
        match self.state {
            EngineState::Stopped | EngineState::Failed => false,
            _ => {
                self.state = EngineState::Stopped;
                true
            }
        }
    }

    /// Marks the schedule failed; returns false if it was already terminal.
    pub fn fail(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = EngineState::Failed;
        true
    }

    /// Moves to phase `index`, skipping zero-length phases.
    fn enter(&mut self, mut index: usize) {
        while let Some(phase) = self.phases.get(index) {
            if phase.duration_secs > DURATION_EPSILON {
                break;
            }
            debug!("skipping zero-length phase '{}'", phase.name);
            self.entry_tps = phase.target_tps;
            index += 1;
        }

        self.phase_elapsed = 0.0;
        self.state = match self.phases.get(index) {
            Some(phase) => {
                debug!("entering phase {} '{}' (target {} TPS)", index, phase.name, phase.target_tps);
                EngineState::Running { phase: index }
            }
            None => EngineState::Completed,
        };
    }
}
