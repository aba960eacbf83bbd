//! Test utilities for strata - doubles for the pluggable seams
//!
//! Strategies, embedders, rerankers and storage that fail, stall or
//! count calls on demand, for exercising the degradation paths without
//! a real backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StrataError};
use crate::memory::types::{MemoryItem, ScoredResult};
use crate::rerank::{RerankCandidate, Reranker};
use crate::search::SearchStrategy;
use crate::storage::{ListOrder, MemoryFilter, MemoryStorage};

fn leak_name(name: &str) -> &'static str {
    Box::leak(name.to_string().into_boxed_str())
}

/// Strategy returning a fixed ranking regardless of the query
pub struct StaticStrategy {
    name: &'static str,
    results: Vec<ScoredResult>,
    weight: f64,
    calls: AtomicUsize,
}

impl StaticStrategy {
    pub fn new(name: &str, results: Vec<(Uuid, f64)>) -> Self {
        Self {
            name: leak_name(name),
            results: results
                .into_iter()
                .map(|(id, score)| ScoredResult::new(id, score))
                .collect(),
            weight: 1.0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Number of times `search` ran
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchStrategy for StaticStrategy {
    async fn search(
        &self,
        _query: &str,
        _tenant_id: &str,
        _filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.iter().take(limit).copied().collect())
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn default_weight(&self) -> f64 {
        self.weight
    }
}

/// Strategy whose backend is always down
pub struct FailingStrategy {
    name: &'static str,
}

impl FailingStrategy {
    pub fn new(name: &str) -> Self {
        Self {
            name: leak_name(name),
        }
    }
}

#[async_trait]
impl SearchStrategy for FailingStrategy {
    async fn search(
        &self,
        _query: &str,
        _tenant_id: &str,
        _filter: &MemoryFilter,
        _limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        Err(StrataError::backend(self.name, "connection refused"))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Strategy with a bug: its task panics instead of returning
pub struct PanickingStrategy {
    name: &'static str,
}

impl PanickingStrategy {
    pub fn new(name: &str) -> Self {
        Self {
            name: leak_name(name),
        }
    }
}

#[async_trait]
impl SearchStrategy for PanickingStrategy {
    async fn search(
        &self,
        _query: &str,
        _tenant_id: &str,
        _filter: &MemoryFilter,
        _limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        panic!("{} strategy hit an unreachable branch", self.name)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Strategy that sleeps before answering
pub struct SlowStrategy {
    inner: StaticStrategy,
    delay: Duration,
}

impl SlowStrategy {
    pub fn new(name: &str, delay: Duration, results: Vec<(Uuid, f64)>) -> Self {
        Self {
            inner: StaticStrategy::new(name, results),
            delay,
        }
    }
}

#[async_trait]
impl SearchStrategy for SlowStrategy {
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        tokio::time::sleep(self.delay).await;
        self.inner.search(query, tenant_id, filter, limit).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Embedder whose model server is unreachable
#[derive(Debug, Clone, Copy)]
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
        Err(StrataError::backend("failing-embedder", "model unavailable"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FailingReranker;

#[async_trait]
impl Reranker for FailingReranker {
    async fn rerank(
        &self,
        _query: &str,
        _candidates: Vec<RerankCandidate>,
        _tenant_id: &str,
        _limit: usize,
    ) -> Result<Vec<RerankCandidate>> {
        Err(StrataError::backend("failing-reranker", "judge timed out"))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Reranker that judges every candidate equally, keeping input order
#[derive(Debug, Clone, Copy)]
pub struct FlatReranker {
    pub score: f64,
}

#[async_trait]
impl Reranker for FlatReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<RerankCandidate>,
        _tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<RerankCandidate>> {
        for candidate in &mut candidates {
            candidate.score = self.score;
        }
        candidates.truncate(limit);
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "flat"
    }
}

/// Storage wrapper counting destructive calls
pub struct CountingStorage {
    inner: Arc<dyn MemoryStorage>,
    deletes: AtomicUsize,
}

impl CountingStorage {
    pub fn new(inner: Arc<dyn MemoryStorage>) -> Self {
        Self {
            inner,
            deletes: AtomicUsize::new(0),
        }
    }

    /// Calls to `delete` that removed an item
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemoryStorage for CountingStorage {
    async fn store(&self, item: MemoryItem) -> Result<Uuid> {
        self.inner.store(item).await
    }

    async fn get(&self, id: Uuid, tenant_id: &str) -> Result<Option<MemoryItem>> {
        self.inner.get(id, tenant_id).await
    }

    async fn list(
        &self,
        tenant_id: &str,
        filter: &MemoryFilter,
        order: ListOrder,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryItem>> {
        self.inner.list(tenant_id, filter, order, limit).await
    }

    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        self.inner.search(query, tenant_id, filter, limit).await
    }

    async fn update_access(&self, id: Uuid, tenant_id: &str) -> Result<bool> {
        self.inner.update_access(id, tenant_id).await
    }

    async fn delete(&self, id: Uuid, tenant_id: &str) -> Result<bool> {
        let deleted = self.inner.delete(id, tenant_id).await?;
        if deleted {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(deleted)
    }

    async fn count(&self, tenant_id: &str, filter: &MemoryFilter) -> Result<usize> {
        self.inner.count(tenant_id, filter).await
    }

    async fn delete_expired(&self, tenant_id: &str, filter: &MemoryFilter) -> Result<usize> {
        self.inner.delete_expired(tenant_id, filter).await
    }

    async fn delete_below_importance(
        &self,
        tenant_id: &str,
        filter: &MemoryFilter,
        threshold: f64,
    ) -> Result<usize> {
        self.inner
            .delete_below_importance(tenant_id, filter, threshold)
            .await
    }

    async fn decay_importance(
        &self,
        tenant_id: &str,
        rate: f64,
        consider_access_stats: bool,
    ) -> Result<usize> {
        self.inner
            .decay_importance(tenant_id, rate, consider_access_stats)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_strategy_counts_calls() {
        let strategy = StaticStrategy::new("fixed", vec![(Uuid::from_u128(1), 0.4)]);
        let results = strategy
            .search("q", "t", &MemoryFilter::new(), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(strategy.calls(), 1);
        assert_eq!(strategy.name(), "fixed");
    }

    #[tokio::test]
    async fn test_failing_doubles_are_degradable() {
        let err = FailingStrategy::new("down")
            .search("q", "t", &MemoryFilter::new(), 1)
            .await
            .unwrap_err();
        assert!(err.is_degradable());
        assert!(FailingEmbedder::new(4).embed_text("x").await.unwrap_err().is_degradable());
    }
}
