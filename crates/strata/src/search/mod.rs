//! Hybrid search
//!
//! Independent [`SearchStrategy`] implementations each rank memories their
//! own way. [`HybridSearchEngine`] runs them concurrently, fuses their
//! rankings and optionally reranks the result.

pub mod engine;
pub mod fusion;
pub mod strategies;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::memory::types::{MemoryItem, ScoredResult, sort_ranked};
use crate::storage::{MemoryFilter, MemoryStorage};

pub use engine::{HybridSearchEngine, SearchRequest};
pub use fusion::{ConfidenceWeightedFusion, FusionStrategy, ReciprocalRankFusion};
pub use strategies::{
    FullTextStrategy, ImportanceStrategy, RecencyStrategy, SparseStrategy, VectorStrategy,
};

/// Query that matches every eligible memory
pub const WILDCARD_QUERY: &str = "*";

/// One independent way of ranking memories for a query
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    /// Ranked `(id, score)` pairs, best first. Scores only mean something
    /// relative to this strategy's other results.
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredResult>>;

    fn name(&self) -> &'static str;

    /// Fusion weight used when the caller does not override it
    fn default_weight(&self) -> f64 {
        1.0
    }
}

pub fn is_wildcard(query: &str) -> bool {
    query.trim() == WILDCARD_QUERY
}

/// Every eligible unexpired memory at score 1.0, in id order
pub async fn wildcard_results(
    storage: &dyn MemoryStorage,
    tenant_id: &str,
    filter: &MemoryFilter,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<ScoredResult>> {
    let mut results: Vec<ScoredResult> = strategies::candidates(storage, tenant_id, filter, now)
        .await?
        .iter()
        .map(|item| ScoredResult::new(item.id, 1.0))
        .collect();
    sort_ranked(&mut results);
    results.truncate(limit);
    Ok(results)
}

/// Lower-cased whitespace tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Fraction of distinct query words present in the item's content or tags
pub fn keyword_overlap(query_terms: &BTreeSet<String>, item: &MemoryItem) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content: BTreeSet<String> = tokenize(&item.content).into_iter().collect();
    let matched = query_terms
        .iter()
        .filter(|term| content.contains(*term) || item.has_tag(term))
        .count();
    matched as f64 / query_terms.len() as f64
}

/// Sort, drop non-positive scores and cut to `limit`
pub(crate) fn finish_ranking(mut results: Vec<ScoredResult>, limit: usize) -> Vec<ScoredResult> {
    results.retain(|r| r.score > 0.0);
    sort_ranked(&mut results);
    results.truncate(limit);
    results
}
