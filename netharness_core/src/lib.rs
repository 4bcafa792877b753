//! NetHarness Core - topology, workload and synthesis engines
//!
//! This library holds everything about a network test that does not depend
//! on a clock:
//! 1. **Topology**: registry of simulated nodes and links
//! 2. **Workload**: user behaviors, transaction patterns and load profiles
//! 3. **Synthesis**: seeded transaction generation and pattern analysis
//! 4. **Records**: run records and the append-only history repository

pub mod analyzer;
pub mod behavior;
pub mod catalog;
pub mod error;
pub mod history;
pub mod pattern;
pub mod profile;
pub mod records;
pub mod scenario;
pub mod synthesizer;
pub mod topology;
pub mod transaction;

// Re-export key types for convenience
pub use analyzer::{analyze_transaction_patterns, PatternAnalysis};
pub use behavior::{TransactionType, UserBehavior};
pub use catalog::WorkloadCatalog;
pub use error::{ErrorKind, HarnessError};
pub use history::{HistoryEntry, HistoryRepository, InMemoryHistory, SledHistory};
pub use pattern::TransactionPattern;
pub use profile::{LoadProfile, LoadProfileSpec, Phase};
pub use records::{Generation, RunStatus, TestResults, TestRun};
pub use scenario::{FaultDirective, ResolvedScenario, Scenario};
pub use synthesizer::{BehaviorMix, Synthesizer};
pub use topology::{NodeStatus, Topology, TopologyRegistry, TopologySpec};
pub use transaction::{ObservedTransaction, Transaction};
