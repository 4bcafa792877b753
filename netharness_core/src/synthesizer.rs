//! The "Synthesis" Engine - generates synthetic transaction batches.
//!
//! Each transaction is produced in three draws from an injected, seeded RNG:
//! 1. **Behavior**: weighted draw over the mix
//! 2. **Type + payload**: from that behavior's distributions
//! 3. **Offset**: an inter-arrival gap, used only to order a batch
//!
//! The same seed and the same mix always yield the same batch.

use crate::behavior::{TransactionType, UserBehavior};
use crate::error::HarnessError;
use crate::transaction::Transaction;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// One behavior in a resolved mix, with its type sampler prebuilt.
#[derive(Debug, Clone)]
struct MixEntry {
    behavior: UserBehavior,
    weight: f64,
    types: Vec<TransactionType>,
    type_index: WeightedIndex<f64>,
}

/// A pattern resolved against concrete behaviors.
///
/// Holds copies of the behaviors, so it stays valid if the catalog changes.
#[derive(Debug, Clone)]
pub struct BehaviorMix {
    entries: Vec<MixEntry>,
    behavior_index: WeightedIndex<f64>,
}

impl BehaviorMix {
    /// Builds a mix from `(behavior, weight)` pairs.
    pub fn new(pairs: Vec<(UserBehavior, f64)>) -> Result<Self, HarnessError> {
        if pairs.is_empty() {
            return Err(HarnessError::InvalidPattern("mix has no behaviors".into()));
        }

        let total: f64 = pairs.iter().map(|(_, w)| *w).sum();
        let mut entries = Vec::with_capacity(pairs.len());
        for (behavior, weight) in pairs {
            behavior.validate()?;
            let (types, weights): (Vec<_>, Vec<_>) = behavior
                .type_weights
                .iter()
                .filter(|(_, w)| **w > 0.0)
                .map(|(t, w)| (*t, *w))
                .unzip();
            let type_index = WeightedIndex::new(&weights)
                .map_err(|e| HarnessError::InvalidPattern(format!("behavior '{}': {}", behavior.id, e)))?;
            entries.push(MixEntry {
                behavior,
                weight: if total > 0.0 { weight / total } else { weight },
                types,
                type_index,
            });
        }

        let behavior_index = WeightedIndex::new(entries.iter().map(|e| e.weight))
            .map_err(|e| HarnessError::InvalidPattern(format!("mix weights: {}", e)))?;

        Ok(Self {
            entries,
            behavior_index,
        })
    }

    /// Behavior ids in mix order.
    pub fn behavior_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.behavior.id.as_str()).collect()
    }

    /// Normalized weight of a behavior (0 if absent).
    pub fn weight_of(&self, behavior_id: &str) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.behavior.id == behavior_id)
            .map(|e| e.weight)
            .sum()
    }

    /// The behaviors in this mix.
    pub fn behaviors(&self) -> Vec<UserBehavior> {
        self.entries.iter().map(|e| e.behavior.clone()).collect()
    }

    /// Expected share of `tx_type` across the whole mix.
    pub fn expected_type_share(&self, tx_type: TransactionType) -> f64 {
        self.entries
            .iter()
            .map(|e| e.weight * e.behavior.type_probability(tx_type))
            .sum()
    }
}

/// Deterministic transaction generator.
pub struct Synthesizer {
    rng: ChaCha8Rng,
    regions: Vec<String>,
    next_id: u64,
}

/// Region assigned when a synthesizer has no region list.
pub const DEFAULT_REGION: &str = "global";

impl Synthesizer {
    /// Creates a synthesizer drawing from `rng`.
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            rng,
            regions: Vec::new(),
            next_id: 0,
        }
    }

    /// Restricts generated traffic to these regions (uniform draw).
    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }

    /// Number of transactions generated so far.
    pub fn generated(&self) -> u64 {
        self.next_id
    }

    /// Generates `count` transactions from `mix`.
    ///
    /// The batch is returned sorted by `offset_ms`; callers should treat it
    /// as an unordered set.
    pub fn synthesize(&mut self, mix: &BehaviorMix, count: usize) -> Result<Vec<Transaction>, HarnessError> {
        let mut batch = Vec::with_capacity(count);

        for _ in 0..count {
            let entry = &mix.entries[mix.behavior_index.sample(&mut self.rng)];
            let tx_type = *entry
                .types
                .get(entry.type_index.sample(&mut self.rng))
                .ok_or_else(|| HarnessError::fault(format!("type draw out of range for '{}'", entry.behavior.id)))?;
            let payload_bytes = entry.behavior.payload.sample(&mut self.rng);
            let offset_ms = entry.behavior.timing.sample(&mut self.rng);
            let region = match self.regions.len() {
                0 => DEFAULT_REGION.to_string(),
                1 => self.regions[0].clone(),
                n => self.regions[self.rng.gen_range(0..n)].clone(),
            };

            batch.push(Transaction {
                id: self.next_id,
                tx_type,
                behavior: entry.behavior.id.clone(),
                region,
                payload_bytes,
                offset_ms,
            });
            self.next_id += 1;
        }

        batch.sort_by(|a, b| a.offset_ms.total_cmp(&b.offset_ms));
        Ok(batch)
    }
}
