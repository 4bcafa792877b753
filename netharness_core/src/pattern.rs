//! Transaction patterns: weighted mixtures of user behaviors.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};

/// Tolerance on the sum of pattern weights before renormalizing.
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// One behavior's share in a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternComponent {
    pub behavior_id: String,
    pub weight: f64,
}

impl PatternComponent {
    pub fn new(behavior_id: &str, weight: f64) -> Self {
        Self {
            behavior_id: behavior_id.to_string(),
            weight,
        }
    }
}

/// A named composition of user behaviors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPattern {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub components: Vec<PatternComponent>,
}

impl TransactionPattern {
    pub fn new(id: &str, name: &str, components: Vec<PatternComponent>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            components,
        }
    }

    /// Equal-weight pattern over the given behaviors.
    pub fn uniform(id: &str, behavior_ids: &[String]) -> Self {
        let weight = 1.0 / behavior_ids.len().max(1) as f64;
        Self::new(
            id,
            id,
            behavior_ids.iter().map(|b| PatternComponent::new(b, weight)).collect(),
        )
    }

    /// Sum of component weights.
    pub fn total_weight(&self) -> f64 {
        self.components.iter().map(|c| c.weight).sum()
    }

    /// Rescales weights so they sum to 1.0.
    ///
    /// Weights already within `WEIGHT_EPSILON` of 1.0 are left untouched.
    /// Fails if any weight is negative or non-finite, or if nothing is active.
    pub fn normalize(&mut self) -> Result<(), HarnessError> {
        if self.components.is_empty() {
            return Err(HarnessError::InvalidPattern(format!("pattern '{}' has no components", self.id)));
        }
        if self.components.iter().any(|c| !c.weight.is_finite() || c.weight < 0.0) {
            return Err(HarnessError::InvalidPattern(format!(
                "pattern '{}' has a negative or non-finite weight",
                self.id
            )));
        }

        let total = self.total_weight();
        if total <= 0.0 {
            return Err(HarnessError::InvalidPattern(format!("pattern '{}' has no active weight", self.id)));
        }
        if (total - 1.0).abs() > WEIGHT_EPSILON {
            for component in &mut self.components {
                component.weight /= total;
            }
        }
        Ok(())
    }

    /// Returns a normalized copy.
    pub fn normalized(&self) -> Result<Self, HarnessError> {
        let mut copy = self.clone();
        copy.normalize()?;
        Ok(copy)
    }

    /// Merges patterns, giving each an equal share of the result.
    ///
    /// Components naming the same behavior are combined.
    pub fn merge(id: &str, patterns: &[TransactionPattern]) -> Result<Self, HarnessError> {
        if patterns.is_empty() {
            return Err(HarnessError::InvalidPattern("nothing to merge".into()));
        }

        let share = 1.0 / patterns.len() as f64;
        let mut merged: Vec<PatternComponent> = Vec::new();
        for pattern in patterns {
            for component in pattern.normalized()?.components {
                match merged.iter_mut().find(|c| c.behavior_id == component.behavior_id) {
                    Some(existing) => existing.weight += component.weight * share,
                    None => merged.push(PatternComponent::new(&component.behavior_id, component.weight * share)),
                }
            }
        }

        let mut result = Self::new(id, id, merged);
        result.normalize()?;
        Ok(result)
    }

    /// Weight of `behavior_id` in this pattern (0 if absent).
    pub fn weight_of(&self, behavior_id: &str) -> f64 {
        self.components
            .iter()
            .filter(|c| c.behavior_id == behavior_id)
            .map(|c| c.weight)
            .sum()
    }
}

/// The built-in pattern catalog.
pub fn builtin_patterns() -> Vec<TransactionPattern> {
    let mut retail = TransactionPattern::new(
        "retail-mix",
        "Retail Mix",
        vec![
            PatternComponent::new("casual-user", 0.7),
            PatternComponent::new("nft-collector", 0.2),
            PatternComponent::new("staker", 0.1),
        ],
    );
    retail.description = "Everyday wallet traffic".into();

    let mut defi = TransactionPattern::new(
        "defi-heavy",
        "DeFi Heavy",
        vec![
            PatternComponent::new("defi-trader", 0.6),
            PatternComponent::new("bot-arbitrage", 0.3),
            PatternComponent::new("casual-user", 0.1),
        ],
    );
    defi.description = "Trading-dominated load with arbitrage bots".into();

    let mut nft = TransactionPattern::new(
        "nft-drop",
        "NFT Drop",
        vec![
            PatternComponent::new("nft-collector", 0.8),
            PatternComponent::new("casual-user", 0.2),
        ],
    );
    nft.description = "Mint storm during a collection launch".into();

    vec![retail, defi, nft]
}
