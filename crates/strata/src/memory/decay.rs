//! Recency and importance decay
//!
//! Two kinds of decay live here:
//! - recency: a continuous `exp(-λ·age_seconds)` signal used at query time
//! - importance decay: a sweep applied to stored importance once per
//!   elapsed whole period (days)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StrataError};
use crate::memory::types::MemoryLayer;

/// Importance never decays below this in an access-aware sweep
pub const SWEEP_IMPORTANCE_FLOOR: f64 = 0.01;

/// Shape of an importance decay curve
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DecayFunction {
    /// `importance · e^(-rate·n)`
    #[default]
    Exponential,
    /// `importance - rate·n`
    Linear,
    /// `importance - rate·ln(1 + n)`
    Logarithmic,
    /// `importance · (1 - rate)^(n / interval)`, dropping once per interval
    Step { interval: u32 },
}

impl DecayFunction {
    /// Decay `importance` over `periods` whole periods, clamped to
    /// `[min_importance, max_importance]`.
    pub fn apply(
        &self,
        importance: f64,
        decay_rate: f64,
        periods: u32,
        min_importance: f64,
        max_importance: f64,
    ) -> f64 {
        let n = f64::from(periods);
        let decayed = match self {
            DecayFunction::Exponential => importance * (-decay_rate * n).exp(),
            DecayFunction::Linear => importance - decay_rate * n,
            DecayFunction::Logarithmic => importance - decay_rate * n.ln_1p(),
            DecayFunction::Step { interval } => {
                let steps = periods / (*interval).max(1);
                importance * (1.0 - decay_rate).max(0.0).powi(steps as i32)
            }
        };
        clamp_bounds(decayed, min_importance, max_importance)
    }
}

/// Per-layer decay parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Recency decay rate per second
    #[serde(default = "default_base_decay_rate")]
    pub base_decay_rate: f64,
    /// Lower clamp for the effective recency rate
    #[serde(default = "default_min_decay_rate")]
    pub min_decay_rate: f64,
    /// Upper clamp for the effective recency rate
    #[serde(default = "default_max_decay_rate")]
    pub max_decay_rate: f64,
    /// Dampen decay for frequently accessed items
    #[serde(default = "default_access_count_boost")]
    pub access_count_boost: bool,
    /// Floor for decayed importance
    #[serde(default = "default_min_importance")]
    pub min_importance: f64,
    /// Ceiling for decayed importance
    #[serde(default = "default_max_importance")]
    pub max_importance: f64,
    /// Curve used by importance sweeps
    #[serde(default)]
    pub function: DecayFunction,
    /// Importance decay per day; zero disables sweeps for the layer
    #[serde(default = "default_importance_decay_rate")]
    pub importance_decay_rate: f64,
}

fn default_base_decay_rate() -> f64 {
    0.001
}

fn default_min_decay_rate() -> f64 {
    0.0001
}

fn default_max_decay_rate() -> f64 {
    0.01
}

fn default_access_count_boost() -> bool {
    true
}

fn default_min_importance() -> f64 {
    0.01
}

fn default_max_importance() -> f64 {
    1.0
}

fn default_importance_decay_rate() -> f64 {
    0.01
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            base_decay_rate: default_base_decay_rate(),
            min_decay_rate: default_min_decay_rate(),
            max_decay_rate: default_max_decay_rate(),
            access_count_boost: default_access_count_boost(),
            min_importance: default_min_importance(),
            max_importance: default_max_importance(),
            function: DecayFunction::default(),
            importance_decay_rate: default_importance_decay_rate(),
        }
    }
}

impl DecayConfig {
    /// Defaults tuned per layer: sensory fades fastest, long-term slowly,
    /// reflective not at all.
    pub fn for_layer(layer: MemoryLayer) -> Self {
        let base = Self::default();
        match layer {
            MemoryLayer::Sensory => Self {
                base_decay_rate: 0.01,
                min_decay_rate: 0.001,
                max_decay_rate: 0.1,
                importance_decay_rate: 0.1,
                ..base
            },
            MemoryLayer::Working => Self {
                importance_decay_rate: 0.05,
                ..base
            },
            MemoryLayer::Episodic => Self {
                base_decay_rate: 0.0001,
                min_decay_rate: 0.00001,
                max_decay_rate: 0.001,
                importance_decay_rate: 0.01,
                ..base
            },
            MemoryLayer::Semantic => Self {
                base_decay_rate: 0.00001,
                min_decay_rate: 0.000001,
                max_decay_rate: 0.0001,
                importance_decay_rate: 0.005,
                function: DecayFunction::Logarithmic,
                ..base
            },
            MemoryLayer::Reflective => Self {
                base_decay_rate: 0.0,
                min_decay_rate: 0.0,
                max_decay_rate: 0.0,
                importance_decay_rate: 0.0,
                ..base
            },
        }
    }

    /// Whether importance sweeps change anything for this layer
    pub fn decays(&self) -> bool {
        self.importance_decay_rate > 0.0
    }

    /// Effective per-second recency rate after access dampening and clamping
    pub fn effective_rate(&self, access_count: u64) -> f64 {
        let rate = if self.access_count_boost {
            self.base_decay_rate / (1.0 + (access_count as f64).ln_1p())
        } else {
            self.base_decay_rate
        };
        clamp_bounds(rate, self.min_decay_rate, self.max_decay_rate)
    }

    /// Apply this layer's importance curve over `periods` days
    pub fn decay_importance(&self, importance: f64, periods: u32) -> f64 {
        self.function.apply(
            importance,
            self.importance_decay_rate,
            periods,
            self.min_importance,
            self.max_importance,
        )
    }
}

/// Output of [`recency_score`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyScore {
    /// `exp(-rate·age)` in `[0, 1]`
    pub score: f64,
    /// Age used for the score, never negative
    pub age_seconds: f64,
    /// Per-second rate after dampening
    pub effective_decay_rate: f64,
}

/// Exponential recency of a memory.
///
/// Age is measured from `last_accessed_at`, falling back to `created_at`.
/// A reference time in the future is logged and treated as age zero.
pub fn recency_score(
    last_accessed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    access_count: u64,
    now: DateTime<Utc>,
    config: &DecayConfig,
) -> RecencyScore {
    let reference = last_accessed_at.unwrap_or(created_at);
    let effective_decay_rate = config.effective_rate(access_count);
    let age_seconds = (now - reference).num_milliseconds() as f64 / 1000.0;

    if age_seconds < 0.0 {
        warn!(
            %reference,
            %now,
            "Memory timestamp is in the future, treating as fresh"
        );
        return RecencyScore {
            score: 1.0,
            age_seconds: 0.0,
            effective_decay_rate,
        };
    }

    RecencyScore {
        score: (-effective_decay_rate * age_seconds).exp().clamp(0.0, 1.0),
        age_seconds,
        effective_decay_rate,
    }
}

/// Half-life in seconds for a per-second decay rate (`ln2 / λ`)
pub fn half_life(decay_rate: f64) -> Result<f64> {
    if !(decay_rate > 0.0) {
        return Err(StrataError::Validation(format!(
            "decay rate must be positive, got {decay_rate}"
        )));
    }
    Ok(std::f64::consts::LN_2 / decay_rate)
}

/// Per-second decay rate for a half-life in seconds (`ln2 / t½`)
pub fn decay_rate_from_half_life(half_life_seconds: f64) -> Result<f64> {
    if !(half_life_seconds > 0.0) {
        return Err(StrataError::Validation(format!(
            "half-life must be positive, got {half_life_seconds}"
        )));
    }
    Ok(std::f64::consts::LN_2 / half_life_seconds)
}

/// One step of the storage-level importance sweep.
///
/// With access stats, items untouched for over 30 days decay faster
/// (`rate · (1 + days/30)`) and items used within the last week decay at
/// half rate. The result never drops below [`SWEEP_IMPORTANCE_FLOOR`].
pub fn sweep_importance(importance: f64, rate: f64, days_since_access: Option<f64>) -> f64 {
    let effective = match days_since_access {
        Some(days) if days > 30.0 => rate * (1.0 + days / 30.0),
        Some(days) if days < 7.0 => rate * 0.5,
        _ => rate,
    };
    (importance * (1.0 - effective.clamp(0.0, 1.0))).max(SWEEP_IMPORTANCE_FLOOR)
}

fn clamp_bounds(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}
