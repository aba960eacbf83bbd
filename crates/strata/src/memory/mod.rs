//! Memory model, scoring and decay

pub mod decay;
pub mod scoring;
pub mod types;

pub use decay::{
    DecayConfig, DecayFunction, RecencyScore, decay_rate_from_half_life, half_life,
    recency_score, sweep_importance,
};
pub use scoring::{MemoryScore, ScoringWeights, compute_memory_score, rank_memories, score_memory};
pub use types::{MemoryItem, MemoryLayer, Metadata, NewMemory, ScoredResult, sort_ranked};
