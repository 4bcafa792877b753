//! Pattern Analyzer - reverse-computes pattern statistics from a batch.
//!
//! The analyzer is a pure function over arbitrary input. It computes:
//! - **Type distribution**: count and share per transaction type
//! - **Payload statistics**: min/max/mean/percentiles and a size histogram
//! - **Behavior mix**: tagged records counted directly, untagged records
//!   attributed by expectation-maximisation over known behaviors
//!
//! # EM attribution
//!
//! For untagged records with a known type, the mixing weights `π` over the
//! known behaviors are estimated by iterating
//!
//! ```text
//! L(b, x) = p_b(type_x) · f_b(size_x)
//! r(b, x) = π_b · L(b, x) / Σ_c π_c · L(c, x)
//! π_b     = mean over x of r(b, x)
//! ```
//!
//! `f_b` is the behavior's payload likelihood. Records without a usable
//! payload, or whose payload no behavior could have produced, fall back to
//! the type term alone.

use crate::behavior::UserBehavior;
use crate::transaction::ObservedTransaction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const EM_ITERATIONS: usize = 200;
const EM_TOLERANCE: f64 = 1e-9;

/// Upper bounds (bytes, inclusive) of the payload histogram buckets.
pub const PAYLOAD_BUCKETS: [f64; 6] = [128.0, 256.0, 512.0, 1024.0, 4096.0, f64::INFINITY];

/// Count and share of one transaction type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeShare {
    pub count: usize,
    pub share: f64,
}

/// One payload histogram bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadBucket {
    /// Inclusive upper bound; `None` for the open-ended last bucket
    pub up_to_bytes: Option<f64>,
    pub count: usize,
}

/// Payload size summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStats {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub histogram: Vec<PayloadBucket>,
}

/// Inferred share of one behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorShare {
    pub behavior: String,
    pub share: f64,
    /// Records carrying an explicit tag for this behavior
    pub tagged: usize,
    /// Expected number of untagged records attributed to it
    pub inferred: f64,
}

/// Result of analysing a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalysis {
    pub count: usize,
    pub type_distribution: BTreeMap<String, TypeShare>,
    /// Records without a type
    pub untyped: usize,
    pub payload: Option<PayloadStats>,
    pub region_distribution: BTreeMap<String, usize>,
    /// Sorted by descending share
    pub behavior_mix: Vec<BehaviorShare>,
    pub dominant_behavior: Option<String>,
    /// Records that could not be attributed to any behavior
    pub unattributed: usize,
}

impl PatternAnalysis {
    /// Share of a behavior in the inferred mix (0 if absent).
    pub fn behavior_share(&self, behavior: &str) -> f64 {
        self.behavior_mix
            .iter()
            .find(|b| b.behavior == behavior)
            .map_or(0.0, |b| b.share)
    }

    /// Share of a transaction type (0 if absent).
    pub fn type_share(&self, tx_type: &str) -> f64 {
        self.type_distribution.get(tx_type).map_or(0.0, |t| t.share)
    }
}

/// Analyses an arbitrary transaction batch.
///
/// `known_behaviors` are only used to attribute untagged records. Empty input
/// yields a `count = 0` analysis.
pub fn analyze_transaction_patterns(
    transactions: &[ObservedTransaction],
    known_behaviors: &[UserBehavior],
) -> PatternAnalysis {
    let mut analysis = PatternAnalysis {
        count: transactions.len(),
        ..Default::default()
    };
    if transactions.is_empty() {
        return analysis;
    }

    // Types
    let mut type_counts: BTreeMap<String, usize> = BTreeMap::new();
    for tx in transactions {
        match &tx.tx_type {
            Some(t) => *type_counts.entry(t.clone()).or_default() += 1,
            None => analysis.untyped += 1,
        }
        if let Some(region) = &tx.region {
            *analysis.region_distribution.entry(region.clone()).or_default() += 1;
        }
    }
    let typed = transactions.len() - analysis.untyped;
    analysis.type_distribution = type_counts
        .into_iter()
        .map(|(t, count)| {
            let share = count as f64 / typed as f64;
            (t, TypeShare { count, share })
        })
        .collect();

    // Payloads
    let sizes: Vec<f64> = transactions
        .iter()
        .filter_map(|tx| tx.payload_bytes)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .collect();
    analysis.payload = payload_stats(sizes);

    // Behaviors
    let mut tagged: BTreeMap<String, usize> = BTreeMap::new();
    let mut untagged = Vec::new();
    for tx in transactions {
        match &tx.behavior {
            Some(b) => *tagged.entry(b.clone()).or_default() += 1,
            None => untagged.push(tx),
        }
    }

    let (inferred, unattributed) = infer_untagged(&untagged, known_behaviors);
    analysis.unattributed = unattributed;

    let mut mix: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for (behavior, count) in tagged {
        mix.entry(behavior).or_default().0 = count;
    }
    for (behavior, expected) in inferred {
        if expected > 0.0 {
            mix.entry(behavior).or_default().1 += expected;
        }
    }

    let attributed = (transactions.len() - unattributed) as f64;
    if attributed > 0.0 {
        analysis.behavior_mix = mix
            .into_iter()
            .map(|(behavior, (tagged, inferred))| BehaviorShare {
                share: (tagged as f64 + inferred) / attributed,
                behavior,
                tagged,
                inferred,
            })
            .collect();
        analysis
            .behavior_mix
            .sort_by(|a, b| b.share.total_cmp(&a.share).then_with(|| a.behavior.cmp(&b.behavior)));
        analysis.dominant_behavior = analysis.behavior_mix.first().map(|b| b.behavior.clone());
    }

    analysis
}

fn payload_stats(mut sizes: Vec<f64>) -> Option<PayloadStats> {
    if sizes.is_empty() {
        return None;
    }
    sizes.sort_by(f64::total_cmp);

    let percentile = |p: f64| {
        let rank = ((p * sizes.len() as f64).ceil() as usize).clamp(1, sizes.len());
        sizes[rank - 1]
    };

    let mut histogram: Vec<PayloadBucket> = PAYLOAD_BUCKETS
        .iter()
        .map(|b| PayloadBucket {
            up_to_bytes: b.is_finite().then_some(*b),
            count: 0,
        })
        .collect();
    for size in &sizes {
        if let Some(idx) = PAYLOAD_BUCKETS.iter().position(|b| size <= b) {
            histogram[idx].count += 1;
        }
    }

    Some(PayloadStats {
        samples: sizes.len(),
        min: sizes[0],
        max: sizes[sizes.len() - 1],
        mean: sizes.iter().sum::<f64>() / sizes.len() as f64,
        p50: percentile(0.50),
        p95: percentile(0.95),
        histogram,
    })
}

/// EM over the known behaviors' type and payload distributions.
///
/// Returns the expected record count per behavior and the number of records
/// that no known behavior can explain.
fn infer_untagged(untagged: &[&ObservedTransaction], known: &[UserBehavior]) -> (Vec<(String, f64)>, usize) {
    if known.is_empty() {
        return (Vec::new(), untagged.len());
    }

    // Likelihood rows for records that at least one behavior can produce
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut unattributed = 0;
    for tx in untagged {
        let row: Option<Vec<f64>> = tx.known_type().map(|t| {
            let by_type: Vec<f64> = known.iter().map(|b| b.type_probability(t)).collect();
            match tx.payload_bytes.filter(|s| s.is_finite() && *s >= 0.0) {
                Some(size) => {
                    let joint: Vec<f64> = known
                        .iter()
                        .zip(&by_type)
                        .map(|(b, p)| p * b.payload.likelihood(size))
                        .collect();
                    if joint.iter().any(|p| *p > 0.0) {
                        joint
                    } else {
                        by_type
                    }
                }
                None => by_type,
            }
        });
        match row {
            Some(row) if row.iter().any(|p| *p > 0.0) => rows.push(row),
            _ => unattributed += 1,
        }
    }
    if rows.is_empty() {
        return (Vec::new(), unattributed);
    }

    let k = known.len();
    let mut pi = vec![1.0 / k as f64; k];
    let mut totals = vec![0.0; k];
    for _ in 0..EM_ITERATIONS {
        totals.iter_mut().for_each(|t| *t = 0.0);
        for row in &rows {
            let norm: f64 = row.iter().zip(&pi).map(|(p, w)| p * w).sum();
            if norm <= 0.0 {
                continue;
            }
            for (j, total) in totals.iter_mut().enumerate() {
                *total += row[j] * pi[j] / norm;
            }
        }
        let next: Vec<f64> = totals.iter().map(|t| t / rows.len() as f64).collect();
        let delta: f64 = next.iter().zip(&pi).map(|(a, b)| (a - b).abs()).sum();
        pi = next;
        if delta < EM_TOLERANCE {
            break;
        }
    }

    let expected = known
        .iter()
        .zip(&pi)
        .map(|(b, w)| (b.id.clone(), w * rows.len() as f64))
        .collect();
    (expected, unattributed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{builtin_behaviors, PayloadDistribution, TimingDistribution, TransactionType};
    use crate::catalog::WorkloadCatalog;
    use crate::synthesizer::Synthesizer;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn observed(tx_type: Option<&str>, size: Option<f64>, behavior: Option<&str>) -> ObservedTransaction {
        ObservedTransaction {
            tx_type: tx_type.map(str::to_string),
            payload_bytes: size,
            behavior: behavior.map(str::to_string),
            region: None,
        }
    }

    fn single_type_behavior(id: &str, tx_type: TransactionType) -> UserBehavior {
        UserBehavior {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            type_weights: [(tx_type, 1.0)].into_iter().collect(),
            timing: TimingDistribution::Constant { interval_ms: 1.0 },
            payload: PayloadDistribution::Fixed { bytes: 100 },
        }
    }

    #[test]
    fn test_empty_batch() {
        let analysis = analyze_transaction_patterns(&[], &builtin_behaviors());
        assert_eq!(analysis.count, 0);
        assert!(analysis.type_distribution.is_empty());
        assert!(analysis.payload.is_none());
        assert!(analysis.dominant_behavior.is_none());
    }

    #[test]
    fn test_type_and_payload_stats() {
        let batch = vec![
            observed(Some("transfer"), Some(100.0), None),
            observed(Some("transfer"), Some(300.0), None),
            observed(Some("bridge"), Some(5000.0), None),
            observed(None, None, None),
        ];
        let analysis = analyze_transaction_patterns(&batch, &[]);

        assert_eq!(analysis.count, 4);
        assert_eq!(analysis.untyped, 1);
        assert_relative_eq!(analysis.type_share("transfer"), 2.0 / 3.0);
        assert_relative_eq!(analysis.type_share("bridge"), 1.0 / 3.0);

        let payload = analysis.payload.unwrap();
        assert_eq!(payload.samples, 3);
        assert_relative_eq!(payload.min, 100.0);
        assert_relative_eq!(payload.max, 5000.0);
        assert_relative_eq!(payload.p50, 300.0);
        let counts: Vec<usize> = payload.histogram.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 0, 1, 0, 0, 1]);

        // No known behaviors and no tags: nothing attributable
        assert_eq!(analysis.unattributed, 4);
        assert!(analysis.behavior_mix.is_empty());
    }

    #[test]
    fn test_em_recovers_disjoint_mix() {
        let known = vec![
            single_type_behavior("stakers", TransactionType::Stake),
            single_type_behavior("minters", TransactionType::NftMint),
        ];
        let mut batch = vec![observed(Some("stake"), None, None); 30];
        batch.extend(vec![observed(Some("nft-mint"), None, None); 10]);

        let analysis = analyze_transaction_patterns(&batch, &known);
        assert_relative_eq!(analysis.behavior_share("stakers"), 0.75, epsilon = 1e-6);
        assert_relative_eq!(analysis.behavior_share("minters"), 0.25, epsilon = 1e-6);
        assert_eq!(analysis.dominant_behavior.as_deref(), Some("stakers"));
    }

    #[test]
    fn test_recovers_synthesizer_weights() {
        let catalog = WorkloadCatalog::with_builtins();
        let mix = catalog.resolve_mix(Some("retail-mix"), &[], &[]).unwrap();
        let batch = Synthesizer::new(ChaCha8Rng::seed_from_u64(11))
            .synthesize(&mix, 20_000)
            .unwrap();
        let observed: Vec<ObservedTransaction> = batch.iter().map(ObservedTransaction::from).collect();

        let analysis = analyze_transaction_patterns(&observed, &catalog.list_user_behaviors());
        for id in mix.behavior_ids() {
            assert_relative_eq!(analysis.behavior_share(id), mix.weight_of(id), epsilon = 0.02);
        }
        assert_eq!(analysis.dominant_behavior.as_deref(), Some("casual-user"));
    }

    #[test]
    fn test_recovers_weights_without_tags() {
        let catalog = WorkloadCatalog::with_builtins();
        let known = catalog.list_user_behaviors();
        for (i, pattern) in ["retail-mix", "defi-heavy", "nft-drop"].into_iter().enumerate() {
            let mix = catalog.resolve_mix(Some(pattern), &[], &[]).unwrap();
            let batch = Synthesizer::new(ChaCha8Rng::seed_from_u64(100 + i as u64))
                .synthesize(&mix, 20_000)
                .unwrap();
            let observed: Vec<ObservedTransaction> = batch
                .iter()
                .map(|tx| ObservedTransaction {
                    behavior: None,
                    ..ObservedTransaction::from(tx)
                })
                .collect();

            let analysis = analyze_transaction_patterns(&observed, &known);
            assert_eq!(analysis.unattributed, 0);
            for id in mix.behavior_ids() {
                assert_relative_eq!(analysis.behavior_share(id), mix.weight_of(id), epsilon = 0.02);
            }
        }
    }

    #[test]
    fn test_payload_separates_same_type_behaviors() {
        let mut small = single_type_behavior("small", TransactionType::Transfer);
        small.payload = PayloadDistribution::Fixed { bytes: 100 };
        let mut large = single_type_behavior("large", TransactionType::Transfer);
        large.payload = PayloadDistribution::Fixed { bytes: 900 };

        let mut batch = vec![observed(Some("transfer"), Some(100.0), None); 12];
        batch.extend(vec![observed(Some("transfer"), Some(900.0), None); 4]);
        // Unusable payload falls back to the type term
        batch.push(observed(Some("transfer"), Some(5.0), None));

        let analysis = analyze_transaction_patterns(&batch, &[small, large]);
        assert_eq!(analysis.unattributed, 0);
        let small_share = analysis.behavior_share("small");
        let large_share = analysis.behavior_share("large");
        assert_relative_eq!(small_share + large_share, 1.0, epsilon = 1e-9);
        assert!((small_share - 12.75 / 17.0).abs() < 0.01, "small share {}", small_share);
        assert!((large_share - 4.25 / 17.0).abs() < 0.01, "large share {}", large_share);
    }

    #[test]
    fn test_tagged_unknown_behavior_is_counted() {
        let batch = vec![observed(None, None, Some("whale")), observed(None, None, Some("whale"))];
        let analysis = analyze_transaction_patterns(&batch, &builtin_behaviors());
        assert_relative_eq!(analysis.behavior_share("whale"), 1.0);
        assert_eq!(analysis.behavior_mix[0].tagged, 2);
    }
}
