//! Core environment context trait for NetHarness runs.

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// Run drivers never touch `tokio::time` or a global RNG directly. They go
/// through this trait so the same loop can run against the wall clock in
/// production and against a manually advanced virtual clock in tests.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, seeded ChaCha streams
/// - **Simulation**: `SimContext` (in `netharness_sim`) - virtual clock that sleep advances
///
/// # Determinism
///
/// Every random stream a run consumes is derived from `seed()` plus a
/// stream id, so a run is reproducible from its seed alone.
#[async_trait]
pub trait HarnessContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for run timestamps.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// Used only to throttle tick cadence; simulated time never depends on it.
    async fn sleep(&self, duration: Duration);

    /// Context for one run's driver task.
    ///
    /// A simulated clock is copied, so the driver's sleeps move only its own
    /// time and never another run's timestamps. The wall clock is shared.
    fn fork(&self) -> Self
    where
        Self: Sized;

    /// Spawns a background task (one per run).
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives the seed of an independent deterministic stream.
    ///
    /// The implementation combines the master seed with `stream` so that
    /// two runs (or two consumers within a run) never share a sequence.
    ///
    /// # Arguments
    /// * `stream` - A value to combine with the master seed
    fn derive_seed(&self, stream: u64) -> u64 {
        mix_seed(self.seed(), stream)
    }

    /// Derives an independent deterministic RNG stream.
    fn derive_rng(&self, stream: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.derive_seed(stream))
    }

    /// Returns the context's master seed (for logging/debugging).
    fn seed(&self) -> u64;
}

/// Mixes a master seed with a stream id.
///
/// Shared by every context implementation so that the same seed gives the
/// same streams regardless of which clock drives the run.
pub fn mix_seed(master: u64, stream: u64) -> u64 {
    master.wrapping_mul(0x517cc1b727220a95) ^ stream.wrapping_mul(0x9e3779b97f4a7c15)
}
