//! User behaviors: how one class of synthetic user generates transactions.

use crate::error::HarnessError;
use rand::Rng;
use rand_distr::{Distribution, Exp, LogNormal, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Synthetic transaction categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    Transfer,
    TokenSwap,
    ContractCall,
    NftMint,
    Stake,
}

impl TransactionType {
    pub const ALL: [TransactionType; 5] = [
        TransactionType::Transfer,
        TransactionType::TokenSwap,
        TransactionType::ContractCall,
        TransactionType::NftMint,
        TransactionType::Stake,
    ];

    /// Returns the wire name.
    pub fn name(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "transfer",
            TransactionType::TokenSwap => "token-swap",
            TransactionType::ContractCall => "contract-call",
            TransactionType::NftMint => "nft-mint",
            TransactionType::Stake => "stake",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "transfer" => Ok(TransactionType::Transfer),
            "token-swap" | "swap" => Ok(TransactionType::TokenSwap),
            "contract-call" | "contract" => Ok(TransactionType::ContractCall),
            "nft-mint" | "mint" => Ok(TransactionType::NftMint),
            "stake" | "staking" => Ok(TransactionType::Stake),
            _ => Err(format!("Unknown transaction type: {}", s)),
        }
    }
}

/// Inter-transaction timing distribution (milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TimingDistribution {
    #[serde(rename_all = "camelCase")]
    Constant { interval_ms: f64 },
    #[serde(rename_all = "camelCase")]
    Uniform { min_ms: f64, max_ms: f64 },
    #[serde(rename_all = "camelCase")]
    Exponential { mean_ms: f64 },
}

impl TimingDistribution {
    /// Draws one inter-arrival gap.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            TimingDistribution::Constant { interval_ms } => interval_ms,
            TimingDistribution::Uniform { min_ms, max_ms } => {
                if max_ms > min_ms {
                    rng.gen_range(min_ms..max_ms)
                } else {
                    min_ms
                }
            }
            TimingDistribution::Exponential { mean_ms } => match Exp::new(1.0 / mean_ms) {
                Ok(exp) => exp.sample(rng),
                Err(_) => mean_ms,
            },
        }
    }

    /// Expected gap.
    pub fn mean_ms(&self) -> f64 {
        match *self {
            TimingDistribution::Constant { interval_ms } => interval_ms,
            TimingDistribution::Uniform { min_ms, max_ms } => (min_ms + max_ms) / 2.0,
            TimingDistribution::Exponential { mean_ms } => mean_ms,
        }
    }

    fn validate(&self) -> Result<(), String> {
        let ok = match *self {
            TimingDistribution::Constant { interval_ms } => interval_ms.is_finite() && interval_ms >= 0.0,
            TimingDistribution::Uniform { min_ms, max_ms } => {
                min_ms.is_finite() && max_ms.is_finite() && min_ms >= 0.0 && max_ms >= min_ms
            }
            TimingDistribution::Exponential { mean_ms } => mean_ms.is_finite() && mean_ms > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("invalid timing distribution {:?}", self))
        }
    }
}

/// Payload size distribution (bytes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PayloadDistribution {
    #[serde(rename_all = "camelCase")]
    Fixed { bytes: u32 },
    #[serde(rename_all = "camelCase")]
    Uniform { min_bytes: u32, max_bytes: u32 },
    #[serde(rename_all = "camelCase")]
    Normal { mean_bytes: f64, std_bytes: f64 },
    #[serde(rename_all = "camelCase")]
    LogNormal { median_bytes: f64, sigma: f64 },
}

/// Smallest payload the synthesizer will emit.
pub const MIN_PAYLOAD_BYTES: u32 = 32;

impl PayloadDistribution {
    /// Draws one payload size, clamped to at least `MIN_PAYLOAD_BYTES`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let raw = match *self {
            PayloadDistribution::Fixed { bytes } => bytes as f64,
            PayloadDistribution::Uniform { min_bytes, max_bytes } => {
                if max_bytes > min_bytes {
                    rng.gen_range(min_bytes..=max_bytes) as f64
                } else {
                    min_bytes as f64
                }
            }
            PayloadDistribution::Normal { mean_bytes, std_bytes } => match Normal::new(mean_bytes, std_bytes) {
                Ok(normal) => normal.sample(rng),
                Err(_) => mean_bytes,
            },
            PayloadDistribution::LogNormal { median_bytes, sigma } => {
                match LogNormal::new(median_bytes.ln(), sigma) {
                    Ok(log_normal) => log_normal.sample(rng),
                    Err(_) => median_bytes,
                }
            }
        };
        (raw.round().max(MIN_PAYLOAD_BYTES as f64)).min(u32::MAX as f64) as u32
    }

    /// Probability of emitting a payload of `bytes`, rounded to whole bytes.
    ///
    /// Continuous distributions contribute their density over the one-byte
    /// bin. Mass that sampling clamps up to `MIN_PAYLOAD_BYTES` is not folded
    /// back into that bin.
    pub fn likelihood(&self, bytes: f64) -> f64 {
        let x = bytes.round();
        let point = |at: f64| if x == at.round().max(MIN_PAYLOAD_BYTES as f64) { 1.0 } else { 0.0 };
        let sqrt_2pi = (2.0 * std::f64::consts::PI).sqrt();

        match *self {
            PayloadDistribution::Fixed { bytes } => point(bytes as f64),
            PayloadDistribution::Uniform { min_bytes, max_bytes } => {
                if max_bytes <= min_bytes {
                    point(min_bytes as f64)
                } else if x >= min_bytes as f64 && x <= max_bytes as f64 {
                    1.0 / (max_bytes - min_bytes + 1) as f64
                } else {
                    0.0
                }
            }
            PayloadDistribution::Normal { mean_bytes, std_bytes } => {
                if std_bytes <= 0.0 {
                    return point(mean_bytes);
                }
                let z = (x - mean_bytes) / std_bytes;
                (-0.5 * z * z).exp() / (std_bytes * sqrt_2pi)
            }
            PayloadDistribution::LogNormal { median_bytes, sigma } => {
                if sigma <= 0.0 {
                    return point(median_bytes);
                }
                if x <= 0.0 {
                    return 0.0;
                }
                let z = (x.ln() - median_bytes.ln()) / sigma;
                (-0.5 * z * z).exp() / (x * sigma * sqrt_2pi)
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        let ok = match *self {
            PayloadDistribution::Fixed { .. } => true,
            PayloadDistribution::Uniform { min_bytes, max_bytes } => max_bytes >= min_bytes,
            PayloadDistribution::Normal { mean_bytes, std_bytes } => {
                mean_bytes.is_finite() && std_bytes.is_finite() && std_bytes >= 0.0
            }
            PayloadDistribution::LogNormal { median_bytes, sigma } => {
                median_bytes.is_finite() && median_bytes > 0.0 && sigma.is_finite() && sigma >= 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!("invalid payload distribution {:?}", self))
        }
    }
}

/// Statistical profile of one class of synthetic user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBehavior {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Relative weight per transaction type (need not sum to 1)
    pub type_weights: BTreeMap<TransactionType, f64>,
    pub timing: TimingDistribution,
    pub payload: PayloadDistribution,
}

impl UserBehavior {
    /// Checks weights and distribution parameters.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let invalid = |msg: String| HarnessError::InvalidPattern(format!("behavior '{}': {}", self.id, msg));

        if self.type_weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid("type weights must be finite and non-negative".into()));
        }
        if self.type_weights.values().sum::<f64>() <= 0.0 {
            return Err(invalid("at least one type weight must be positive".into()));
        }
        self.timing.validate().map_err(invalid)?;
        self.payload.validate().map_err(invalid)?;
        Ok(())
    }

    /// Probability of emitting `tx_type` (normalized weight).
    pub fn type_probability(&self, tx_type: TransactionType) -> f64 {
        let total: f64 = self.type_weights.values().sum();
        if total <= 0.0 {
            return 0.0;
        }
        self.type_weights.get(&tx_type).copied().unwrap_or(0.0) / total
    }
}

fn weights(pairs: &[(TransactionType, f64)]) -> BTreeMap<TransactionType, f64> {
    pairs.iter().copied().collect()
}

/// The built-in behavior catalog.
pub fn builtin_behaviors() -> Vec<UserBehavior> {
    use TransactionType::*;

    vec![
        UserBehavior {
            id: "casual-user".into(),
            name: "Casual User".into(),
            description: "Occasional transfers, the odd contract interaction".into(),
            type_weights: weights(&[(Transfer, 0.80), (ContractCall, 0.15), (NftMint, 0.05)]),
            timing: TimingDistribution::Exponential { mean_ms: 30_000.0 },
            payload: PayloadDistribution::Normal { mean_bytes: 250.0, std_bytes: 50.0 },
        },
        UserBehavior {
            id: "defi-trader".into(),
            name: "DeFi Trader".into(),
            description: "Swap-heavy trading with supporting transfers".into(),
            type_weights: weights(&[(TokenSwap, 0.60), (Transfer, 0.20), (ContractCall, 0.20)]),
            timing: TimingDistribution::Exponential { mean_ms: 5_000.0 },
            payload: PayloadDistribution::LogNormal { median_bytes: 600.0, sigma: 0.4 },
        },
        UserBehavior {
            id: "nft-collector".into(),
            name: "NFT Collector".into(),
            description: "Mints in bursts, trades occasionally".into(),
            type_weights: weights(&[(NftMint, 0.70), (Transfer, 0.20), (ContractCall, 0.10)]),
            timing: TimingDistribution::Uniform { min_ms: 2_000.0, max_ms: 10_000.0 },
            payload: PayloadDistribution::Normal { mean_bytes: 900.0, std_bytes: 200.0 },
        },
        UserBehavior {
            id: "bot-arbitrage".into(),
            name: "Arbitrage Bot".into(),
            description: "High-frequency swaps at a fixed cadence".into(),
            type_weights: weights(&[(TokenSwap, 0.85), (ContractCall, 0.15)]),
            timing: TimingDistribution::Constant { interval_ms: 200.0 },
            payload: PayloadDistribution::Fixed { bytes: 480 },
        },
        UserBehavior {
            id: "staker".into(),
            name: "Staker".into(),
            description: "Long-lived stake management".into(),
            type_weights: weights(&[(Stake, 0.70), (Transfer, 0.20), (ContractCall, 0.10)]),
            timing: TimingDistribution::Exponential { mean_ms: 120_000.0 },
            payload: PayloadDistribution::Fixed { bytes: 180 },
        },
    ]
}
