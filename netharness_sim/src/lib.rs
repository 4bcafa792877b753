//! NetHarness simulation service
//!
//! Runs load tests against simulated network topologies and tracks load-only
//! generations. Everything here is driven through a [`HarnessContext`], so the
//! same code runs on the system clock or deterministically on a virtual one.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Harness                            │
//! │  ┌───────────────┐  ┌───────────────┐  ┌──────────────────┐  │
//! │  │ TopologyReg.  │  │ WorkloadCat.  │  │ HistoryRepository│  │
//! │  └───────┬───────┘  └───────┬───────┘  └────────▲─────────┘  │
//! │          │                  │                   │            │
//! │  ┌───────▼──────────────────▼───────┐           │            │
//! │  │ TestOrchestrator / GenTracker    │───────────┘            │
//! │  └───────┬──────────────────────────┘                        │
//! │          │ one driver task per run                           │
//! │  ┌───────▼────────┐   ┌────────────────┐   ┌──────────────┐  │
//! │  │ LoadProfileEng.│──►│ Synthesizer    │──►│ RunNetwork   │  │
//! │  └────────────────┘   └────────────────┘   └──────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use netharness_sim::{Harness, HarnessConfig};
//! use netharness_core::Scenario;
//!
//! let harness = Harness::simulated(HarnessConfig::default())?;
//! let run = harness
//!     .orchestrator
//!     .start_network_test("minimal-3", Scenario::from_profile("steady-state"))?;
//! let finished = harness.orchestrator.wait_for(run.id).await;
//! ```
//!
//! [`HarnessContext`]: netharness_env::HarnessContext

mod active;
pub mod api;
pub mod config;
mod context;
pub mod exporter;
pub mod generation;
mod harness;
pub mod load_engine;
pub mod network;
pub mod node;
pub mod orchestrator;
pub mod runner;
mod seeds;

#[cfg(test)]
mod tests_prop;

pub use active::epoch_millis;
pub use api::{parse_query, ApiReply, ApiResponse, HarnessApi};
pub use config::{ConfigError, HarnessConfig};
pub use context::SimContext;
pub use exporter::{ExportSummary, RunExport};
pub use generation::{GenerationOptions, GenerationTracker};
pub use harness::Harness;
pub use load_engine::{EngineState, LoadProfileEngine, TickPlan};
pub use network::{DeliveryReport, RunNetwork};
pub use node::{NodeModel, NodeSimulator, NodeTick};
pub use orchestrator::TestOrchestrator;
pub use runner::{MixSource, RunDirective, StepOutcome, TestRunner, TransactionSource};
pub use seeds::SeedProvider;
