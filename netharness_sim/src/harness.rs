//! Harness - the container wiring stores, orchestrator and tracker together.

use crate::config::HarnessConfig;
use crate::context::SimContext;
use crate::generation::GenerationTracker;
use crate::orchestrator::TestOrchestrator;
use crate::seeds::SeedProvider;

use netharness_core::catalog::WorkloadCatalog;
use netharness_core::error::HarnessError;
use netharness_core::history::{HistoryRepository, InMemoryHistory, SledHistory};
use netharness_core::topology::TopologyRegistry;
use netharness_env::{HarnessContext, TokioContext};
use std::sync::Arc;
use tracing::info;

/// Everything one harness process serves from.
///
/// Stores are created once and shared by `Arc`; the orchestrator and the
/// generation tracker share one seed provider so their streams never overlap.
pub struct Harness<C: HarnessContext> {
    pub config: HarnessConfig,
    pub context: Arc<C>,
    pub registry: Arc<TopologyRegistry>,
    pub catalog: Arc<WorkloadCatalog>,
    pub history: Arc<dyn HistoryRepository>,
    pub orchestrator: TestOrchestrator<C>,
    pub generations: GenerationTracker<C>,
}

impl<C: HarnessContext> Harness<C> {
    /// Builds a harness, opening persistent history if `history_path` is set.
    pub fn new(config: HarnessConfig, context: Arc<C>) -> Result<Self, HarnessError> {
        let history: Arc<dyn HistoryRepository> = match &config.history_path {
            Some(path) => {
                let repo = SledHistory::open(path)?;
                info!("Opened history at {} ({} entries)", path.display(), repo.len());
                Arc::new(repo)
            }
            None => Arc::new(InMemoryHistory::new()),
        };
        Ok(Self::with_history(config, context, history))
    }

    /// Builds a harness over an existing history backend.
    pub fn with_history(config: HarnessConfig, context: Arc<C>, history: Arc<dyn HistoryRepository>) -> Self {
        let registry = Arc::new(TopologyRegistry::with_builtins());
        let catalog = Arc::new(WorkloadCatalog::with_builtins());
        let seeds = Arc::new(SeedProvider::new());

        let orchestrator = TestOrchestrator::new(
            Arc::clone(&context),
            Arc::clone(&registry),
            Arc::clone(&catalog),
            Arc::clone(&history),
            Arc::clone(&seeds),
            config.clone(),
        );
        let generations = GenerationTracker::new(
            Arc::clone(&context),
            Arc::clone(&registry),
            Arc::clone(&catalog),
            Arc::clone(&history),
            seeds,
            config.clone(),
        );

        Self {
            config,
            context,
            registry,
            catalog,
            history,
            orchestrator,
            generations,
        }
    }
}

impl Harness<SimContext> {
    /// Harness on a virtual clock seeded from `config.seed`.
    pub fn simulated(config: HarnessConfig) -> Result<Self, HarnessError> {
        let context = SimContext::shared(config.seed);
        Self::new(config, context)
    }
}

impl Harness<TokioContext> {
    /// Harness on the system clock, still seeded from `config.seed`.
    pub fn live(config: HarnessConfig) -> Result<Self, HarnessError> {
        let context = TokioContext::shared(config.seed);
        Self::new(config, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netharness_core::records::RunStatus;
    use netharness_core::scenario::Scenario;
    use crate::generation::GenerationOptions;

    #[test]
    fn test_harness_creation() {
        let harness = Harness::simulated(HarnessConfig::default()).unwrap();
        assert_eq!(harness.registry.len(), 3);
        assert_eq!(harness.context.seed(), 42);
        assert!(harness.history.is_empty());
    }

    #[tokio::test]
    async fn test_tests_and_generations_share_history() {
        let harness = Harness::simulated(HarnessConfig::default()).unwrap();

        let run = harness
            .orchestrator
            .start_network_test("hub-and-spoke", Scenario::from_profile("steady-state"))
            .unwrap();
        let generation = harness
            .generations
            .generate_load("spike", GenerationOptions::default())
            .unwrap();
        assert_ne!(run.seed, generation.seed);

        assert_eq!(harness.orchestrator.wait_for(run.id).await.unwrap().status, RunStatus::Completed);
        assert_eq!(
            harness.generations.wait_for(generation.id).await.unwrap().status,
            RunStatus::Completed
        );
        assert_eq!(harness.history.len(), 2);
    }

    #[tokio::test]
    async fn test_history_persists_across_harnesses() {
        let dir = std::env::temp_dir().join(format!("netharness-harness-{}", netharness_env::RunId::new()));
        let config = HarnessConfig {
            history_path: Some(dir.clone()),
            ..Default::default()
        };

        {
            let harness = Harness::simulated(config.clone()).unwrap();
            let run = harness
                .orchestrator
                .start_network_test("minimal-3", Scenario::from_profile("steady-state"))
                .unwrap();
            harness.orchestrator.wait_for(run.id).await.unwrap();
        }

        let reopened = Harness::simulated(config).unwrap();
        assert_eq!(reopened.orchestrator.test_history(Some("minimal-3")).len(), 1);
        drop(reopened);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
