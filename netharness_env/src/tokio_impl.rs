//! Production implementation of HarnessContext using Tokio.

use crate::HarnessContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by Tokio and the system clock.
///
/// Time comes from the system clock. Randomness is still seeded: the seed is
/// a configuration input, so a wall-clock run can be replayed in simulation.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Master seed for synthesis streams
    seed: u64,
}

impl TokioContext {
    /// Creates a new TokioContext with the given master seed.
    pub fn new(seed: u64) -> Self {
        Self {
            start: Instant::now(),
            seed,
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new(42)
    }
}

#[async_trait]
impl HarnessContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(duration).await;
        }
    }

    fn fork(&self) -> Self {
        Self {
            start: self.start,
            seed: self.seed,
        }
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
