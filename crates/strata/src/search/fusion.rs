//! Combining per-strategy rankings into one
//!
//! Strategies score on incompatible scales, so [`ReciprocalRankFusion`]
//! only looks at ranks. [`ConfidenceWeightedFusion`] normalizes scores
//! within each strategy and lets the most confident strategy decide a
//! document's final score.
//!
//! Both are pure functions of their inputs. Ties are broken by id.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::memory::types::{ScoredResult, sort_ranked};

/// Weight assumed for a strategy missing from the weight map
pub const DEFAULT_STRATEGY_WEIGHT: f64 = 1.0;

pub trait FusionStrategy: Send + Sync {
    /// Fuse `rankings` (strategy name to ranked list, best first) into one
    /// list, best first
    fn fuse(
        &self,
        rankings: &BTreeMap<String, Vec<ScoredResult>>,
        weights: &HashMap<String, f64>,
    ) -> Vec<ScoredResult>;

    fn name(&self) -> &'static str;
}

fn weight_for(weights: &HashMap<String, f64>, strategy: &str) -> f64 {
    weights
        .get(strategy)
        .copied()
        .unwrap_or(DEFAULT_STRATEGY_WEIGHT)
}

fn into_ranked(scores: BTreeMap<Uuid, f64>) -> Vec<ScoredResult> {
    let mut fused: Vec<ScoredResult> = scores
        .into_iter()
        .map(|(id, score)| ScoredResult::new(id, score))
        .collect();
    sort_ranked(&mut fused);
    fused
}

/// `score(d) = Σ weight_s / (k + rank_s(d))`, ranks 1-based
#[derive(Debug, Clone, Copy)]
pub struct ReciprocalRankFusion {
    pub k: f64,
}

impl ReciprocalRankFusion {
    pub fn new(k: f64) -> Self {
        Self { k }
    }
}

impl Default for ReciprocalRankFusion {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

impl FusionStrategy for ReciprocalRankFusion {
    fn fuse(
        &self,
        rankings: &BTreeMap<String, Vec<ScoredResult>>,
        weights: &HashMap<String, f64>,
    ) -> Vec<ScoredResult> {
        let mut scores: BTreeMap<Uuid, f64> = BTreeMap::new();
        for (strategy, results) in rankings {
            let weight = weight_for(weights, strategy);
            for (index, result) in results.iter().enumerate() {
                let rank = (index + 1) as f64;
                *scores.entry(result.memory_id).or_insert(0.0) += weight / (self.k + rank);
            }
        }
        into_ranked(scores)
    }

    fn name(&self) -> &'static str {
        "rrf"
    }
}

/// How decisively a strategy ranked its leader, in `[0, 1]`.
///
/// Averages the relative gap between the top two scores with the leader's
/// z-score (divided by 3). A single result gives gap 1 and z 0.
pub fn strategy_confidence(results: &[ScoredResult]) -> f64 {
    let Some(top) = results.first() else {
        return 0.0;
    };

    let gap = match results.get(1) {
        Some(second) if top.score > 0.0 => ((top.score - second.score) / top.score).clamp(0.0, 1.0),
        Some(_) => 0.0,
        None => 1.0,
    };

    let n = results.len() as f64;
    let mean = results.iter().map(|r| r.score).sum::<f64>() / n;
    let variance = results.iter().map(|r| (r.score - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let z = if std_dev > 0.0 {
        ((top.score - mean) / std_dev / 3.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    ((gap + z) / 2.0).clamp(0.0, 1.0)
}

/// Per strategy: `weight · (1 + confidence)` times the score normalized
/// by that strategy's maximum. A document keeps the maximum over
/// strategies rather than the sum.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceWeightedFusion;

impl FusionStrategy for ConfidenceWeightedFusion {
    fn fuse(
        &self,
        rankings: &BTreeMap<String, Vec<ScoredResult>>,
        weights: &HashMap<String, f64>,
    ) -> Vec<ScoredResult> {
        let mut scores: BTreeMap<Uuid, f64> = BTreeMap::new();
        for (strategy, results) in rankings {
            let max_score = results.iter().map(|r| r.score).fold(f64::NEG_INFINITY, f64::max);
            if !(max_score > 0.0) {
                continue;
            }
            let effective_weight =
                weight_for(weights, strategy) * (1.0 + strategy_confidence(results));

            for result in results {
                let candidate = result.score / max_score * effective_weight;
                scores
                    .entry(result.memory_id)
                    .and_modify(|best| *best = best.max(candidate))
                    .or_insert(candidate);
            }
        }
        into_ranked(scores)
    }

    fn name(&self) -> &'static str {
        "confidence_weighted"
    }
}
