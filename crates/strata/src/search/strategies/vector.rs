//! Semantic similarity through an embedding provider and a vector store

use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::{SharedClock, system_clock};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StrataError};
use crate::memory::types::ScoredResult;
use crate::search::{SearchStrategy, is_wildcard, wildcard_results};
use crate::storage::{MemoryFilter, MemoryStorage, VectorStore};

/// Neighbours fetched per requested result, leaving room for hits the
/// filter rejects afterwards
const OVERSAMPLE: usize = 4;

pub struct VectorStrategy {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    storage: Arc<dyn MemoryStorage>,
    threshold: Option<f64>,
    clock: SharedClock,
}

impl VectorStrategy {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        storage: Arc<dyn MemoryStorage>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            storage,
            threshold: None,
            clock: system_clock(),
        }
    }

    /// Drop hits with cosine similarity below `threshold`
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl SearchStrategy for VectorStrategy {
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        let now = self.clock.now();
        if is_wildcard(query) {
            return wildcard_results(self.storage.as_ref(), tenant_id, filter, now, limit).await;
        }

        let embedding = self
            .embedder
            .embed_text(query)
            .await
            .map_err(|e| StrataError::backend(self.embedder.name(), e.to_string()))?;

        let fetch = limit.saturating_mul(OVERSAMPLE);
        let layer = filter.single_layer();
        let hits = match &filter.tags {
            Some(tags) if !tags.is_empty() => {
                self.vectors
                    .search_similar_tagged(&embedding, tenant_id, layer, self.threshold, tags, fetch)
                    .await?
            }
            _ => {
                self.vectors
                    .search_similar(&embedding, tenant_id, layer, self.threshold, fetch)
                    .await?
            }
        };

        let mut results = Vec::with_capacity(limit.min(hits.len()));
        for hit in hits {
            if results.len() == limit {
                break;
            }
            let Some(item) = self.storage.get(hit.memory_id, tenant_id).await? else {
                continue;
            };
            if filter.matches(&item) && !item.is_expired(now) {
                results.push(hit);
            }
        }
        Ok(results)
    }

    fn name(&self) -> &'static str {
        "vector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::memory::types::{MemoryItem, MemoryLayer};
    use crate::storage::InMemoryStorage;
    use crate::testing::FailingEmbedder;
    use chrono::Utc;

    async fn create_test_strategy() -> (VectorStrategy, Vec<MemoryItem>) {
        let storage = Arc::new(InMemoryStorage::new());
        let embedder = Arc::new(HashingEmbedder::new(1024).unwrap());
        let mut items = Vec::new();
        for (content, layer, agent) in [
            ("rust ownership and borrowing", MemoryLayer::Semantic, "a"),
            ("rust async runtimes", MemoryLayer::Episodic, "a"),
            ("sourdough starter feeding", MemoryLayer::Semantic, "a"),
            ("rust ownership rules", MemoryLayer::Semantic, "b"),
        ] {
            let mut item = MemoryItem::new("t", agent, content, layer, 0.5, Utc::now()).unwrap();
            item.embedding = Some(embedder.embed(content));
            storage.store(item.clone()).await.unwrap();
            items.push(item);
        }
        let strategy = VectorStrategy::new(embedder, storage.clone(), storage);
        (strategy, items)
    }

    #[tokio::test]
    async fn test_ranks_by_similarity() {
        let (strategy, items) = create_test_strategy().await;
        let results = strategy
            .with_threshold(0.1)
            .search("rust ownership", "t", &MemoryFilter::new(), 10)
            .await
            .unwrap();
        let top: Vec<_> = results.iter().take(2).map(|r| r.memory_id).collect();
        assert!(top.contains(&items[0].id));
        assert!(top.contains(&items[3].id));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_filter_applies_after_vector_search() {
        let (strategy, items) = create_test_strategy().await;
        let filter = MemoryFilter::new()
            .with_agent("a")
            .with_layer(MemoryLayer::Semantic);
        let results = strategy.search("rust ownership", "t", &filter, 10).await.unwrap();
        assert!(results.iter().all(|r| r.memory_id != items[3].id));
        assert!(results.iter().all(|r| r.memory_id != items[1].id));
        assert_eq!(results[0].memory_id, items[0].id);
    }

    #[tokio::test]
    async fn test_wildcard() {
        let (strategy, _) = create_test_strategy().await;
        let results = strategy.search("*", "t", &MemoryFilter::new(), 10).await.unwrap();
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn test_embedder_failure_is_backend_unavailable() {
        let storage = Arc::new(InMemoryStorage::new());
        let strategy =
            VectorStrategy::new(Arc::new(FailingEmbedder::new(8)), storage.clone(), storage);
        let err = strategy
            .search("anything", "t", &MemoryFilter::new(), 5)
            .await
            .unwrap_err();
        assert!(err.is_degradable());
    }
}
