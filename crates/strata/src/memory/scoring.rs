//! Unified memory scoring
//!
//! `score = α·relevance + β·importance + γ·recency`, clamped to `[0, 1]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::memory::decay::{DecayConfig, recency_score};
use crate::memory::types::MemoryItem;

/// Tolerance when checking that weights sum to one
const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Weights for the three scoring components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Relevance weight (default: 0.5)
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Importance weight (default: 0.3)
    #[serde(default = "default_beta")]
    pub beta: f64,
    /// Recency weight (default: 0.2)
    #[serde(default = "default_gamma")]
    pub gamma: f64,
}

fn default_alpha() -> f64 {
    0.5
}

fn default_beta() -> f64 {
    0.3
}

fn default_gamma() -> f64 {
    0.2
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            beta: default_beta(),
            gamma: default_gamma(),
        }
    }
}

impl ScoringWeights {
    /// Create weights, logging a warning when they do not sum to 1.0
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        let weights = Self { alpha, beta, gamma };
        weights.check_sum();
        weights
    }

    pub fn sum(&self) -> f64 {
        self.alpha + self.beta + self.gamma
    }

    /// Returns false (and warns) when the weights do not sum to 1.0
    pub fn check_sum(&self) -> bool {
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            warn!(
                alpha = self.alpha,
                beta = self.beta,
                gamma = self.gamma,
                sum,
                "Scoring weights do not sum to 1.0"
            );
            return false;
        }
        true
    }
}

/// Breakdown of a single memory's score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryScore {
    pub memory_id: Uuid,
    pub final_score: f64,
    pub relevance: f64,
    pub importance: f64,
    pub recency: f64,
    pub age_seconds: f64,
    pub access_count: u64,
    pub effective_decay_rate: f64,
}

/// Combine the three components into one clamped score
pub fn compute_memory_score(
    relevance: f64,
    importance: f64,
    recency: f64,
    weights: &ScoringWeights,
) -> f64 {
    let score = weights.alpha * relevance + weights.beta * importance + weights.gamma * recency;
    score.clamp(0.0, 1.0)
}

/// Score a stored memory against a relevance signal at time `now`
pub fn score_memory(
    item: &MemoryItem,
    relevance: f64,
    weights: &ScoringWeights,
    decay: &DecayConfig,
    now: DateTime<Utc>,
) -> MemoryScore {
    let recency = recency_score(
        item.last_accessed_at,
        item.created_at,
        item.usage_count,
        now,
        decay,
    );

    MemoryScore {
        memory_id: item.id,
        final_score: compute_memory_score(relevance, item.importance, recency.score, weights),
        relevance,
        importance: item.importance,
        recency: recency.score,
        age_seconds: recency.age_seconds,
        access_count: item.usage_count,
        effective_decay_rate: recency.effective_decay_rate,
    }
}

/// Score and rank `(item, relevance)` pairs, best first, ties by id
pub fn rank_memories<'a, I>(
    items: I,
    weights: &ScoringWeights,
    decay_for: impl Fn(&MemoryItem) -> DecayConfig,
    now: DateTime<Utc>,
) -> Vec<MemoryScore>
where
    I: IntoIterator<Item = (&'a MemoryItem, f64)>,
{
    let mut scores: Vec<MemoryScore> = items
        .into_iter()
        .map(|(item, relevance)| score_memory(item, relevance, weights, &decay_for(item), now))
        .collect();
    scores.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
    scores
}
