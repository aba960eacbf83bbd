//! Final reordering of fused candidates
//!
//! A [`Reranker`] sees the query and the fused top-N and may reorder or
//! rescore them. External cross-encoders and LLM judges plug in through
//! the trait. The local implementations here are chained by
//! [`FallbackReranker`] so that some ordering is always produced.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StrataError};
use crate::math::cosine_similarity;
use crate::storage::MemoryStorage;

/// A fused result offered to a reranker
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RerankCandidate {
    pub memory_id: Uuid,
    pub score: f64,
    pub importance: f64,
}

impl RerankCandidate {
    pub fn new(memory_id: Uuid, score: f64, importance: f64) -> Self {
        Self {
            memory_id,
            score,
            importance,
        }
    }
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder `candidates` for `query`, returning at most `limit`
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RerankCandidate>,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<RerankCandidate>>;

    fn name(&self) -> &'static str;
}

fn sort_candidates(candidates: &mut [RerankCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
}

/// Blends the fused score with stored importance.
///
/// Needs no backend, so it is the usual last link of a fallback chain.
#[derive(Debug, Clone, Copy)]
pub struct RuleBasedReranker {
    pub score_weight: f64,
    pub importance_weight: f64,
}

impl Default for RuleBasedReranker {
    fn default() -> Self {
        Self {
            score_weight: 0.8,
            importance_weight: 0.2,
        }
    }
}

#[async_trait]
impl Reranker for RuleBasedReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<RerankCandidate>,
        _tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<RerankCandidate>> {
        for candidate in &mut candidates {
            candidate.score =
                self.score_weight * candidate.score + self.importance_weight * candidate.importance;
        }
        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "rule_based"
    }
}

/// Cross-checks candidates against the query embedding.
///
/// `final = semantic_weight · cosine + (1 - semantic_weight) · score`,
/// with negative cosine floored at zero.
pub struct EmbeddingReranker {
    embedder: Arc<dyn EmbeddingProvider>,
    storage: Arc<dyn MemoryStorage>,
    semantic_weight: f64,
}

impl EmbeddingReranker {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, storage: Arc<dyn MemoryStorage>) -> Self {
        Self {
            embedder,
            storage,
            semantic_weight: 0.7,
        }
    }

    pub fn with_semantic_weight(mut self, weight: f64) -> Self {
        self.semantic_weight = weight.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl Reranker for EmbeddingReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RerankCandidate>,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<RerankCandidate>> {
        let query_embedding = self.embedder.embed_text(query).await?;

        let mut reranked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(item) = self.storage.get(candidate.memory_id, tenant_id).await? else {
                continue;
            };
            let embedding = match item.embedding {
                Some(embedding) if embedding.len() == query_embedding.len() => embedding,
                _ => self.embedder.embed_text(&item.content).await?,
            };
            let semantic = cosine_similarity(&query_embedding, &embedding)?.max(0.0);
            reranked.push(RerankCandidate {
                score: self.semantic_weight * semantic
                    + (1.0 - self.semantic_weight) * candidate.score,
                ..candidate
            });
        }

        sort_candidates(&mut reranked);
        reranked.truncate(limit);
        Ok(reranked)
    }

    fn name(&self) -> &'static str {
        "embedding"
    }
}

/// Tries each reranker in order, returning the first success
pub struct FallbackReranker {
    rerankers: Vec<Arc<dyn Reranker>>,
}

impl FallbackReranker {
    pub fn new(rerankers: Vec<Arc<dyn Reranker>>) -> Self {
        Self { rerankers }
    }
}

#[async_trait]
impl Reranker for FallbackReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RerankCandidate>,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<RerankCandidate>> {
        for reranker in &self.rerankers {
            match reranker
                .rerank(query, candidates.clone(), tenant_id, limit)
                .await
            {
                Ok(result) => {
                    debug!(reranker = reranker.name(), "Rerank succeeded");
                    return Ok(result);
                }
                Err(e) => {
                    warn!(reranker = reranker.name(), error = %e, "Reranker failed, trying next");
                }
            }
        }

        Err(StrataError::backend("reranker", "all rerankers failed"))
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
