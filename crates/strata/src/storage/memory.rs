//! In-process storage adapter
//!
//! Implements both [`MemoryStorage`] and [`VectorStore`] over tenant-scoped
//! hash maps. Vectors are held quantized so similarity is computed on
//! integers, and each carries a tag bloom mask for cheap rejection.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::clock::{SharedClock, system_clock};
use crate::error::Result;
use crate::math::{bloom_fingerprint, bloom_may_contain, cosine_similarity_fixed, quantize};
use crate::memory::decay::sweep_importance;
use crate::memory::types::{MemoryItem, MemoryLayer, ScoredResult, sort_ranked};
use crate::storage::{ListOrder, MemoryFilter, MemoryStorage, VectorEntry, VectorStore};

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone)]
struct IndexedVector {
    entry: VectorEntry,
    quantized: Vec<i32>,
    bloom: u64,
}

type TenantMap<T> = HashMap<String, HashMap<Uuid, T>>;

/// Memory and vector storage held entirely in process
pub struct InMemoryStorage {
    memories: RwLock<TenantMap<MemoryItem>>,
    vectors: RwLock<TenantMap<IndexedVector>>,
    clock: SharedClock,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Use an injected clock for access and expiry timestamps
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            memories: RwLock::new(HashMap::new()),
            vectors: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Total number of items across all tenants
    pub async fn len(&self) -> usize {
        self.memories.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn remove_where<F>(&self, tenant_id: &str, predicate: F) -> usize
    where
        F: Fn(&MemoryItem) -> bool,
    {
        let removed: Vec<Uuid> = {
            let mut memories = self.memories.write().await;
            let Some(tenant) = memories.get_mut(tenant_id) else {
                return 0;
            };
            let ids: Vec<Uuid> = tenant
                .values()
                .filter(|item| predicate(*item))
                .map(|item| item.id)
                .collect();
            for id in &ids {
                tenant.remove(id);
            }
            ids
        };

        if !removed.is_empty() {
            let mut vectors = self.vectors.write().await;
            if let Some(tenant) = vectors.get_mut(tenant_id) {
                for id in &removed {
                    tenant.remove(id);
                }
            }
        }
        removed.len()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Position-weighted substring score: earlier hits score higher
fn substring_score(content: &str, query: &str) -> Option<f64> {
    let content = content.to_lowercase();
    let position = content.find(query)?;
    Some(1.0 - position as f64 / content.len().max(1) as f64)
}

#[async_trait]
impl MemoryStorage for InMemoryStorage {
    async fn store(&self, item: MemoryItem) -> Result<Uuid> {
        item.validate()?;
        let id = item.id;

        if let Some(entry) = VectorEntry::from_item(&item) {
            self.store_vector(entry).await?;
        }

        self.memories
            .write()
            .await
            .entry(item.tenant_id.clone())
            .or_default()
            .insert(id, item);
        Ok(id)
    }

    async fn get(&self, id: Uuid, tenant_id: &str) -> Result<Option<MemoryItem>> {
        Ok(self
            .memories
            .read()
            .await
            .get(tenant_id)
            .and_then(|tenant| tenant.get(&id))
            .cloned())
    }

    async fn list(
        &self,
        tenant_id: &str,
        filter: &MemoryFilter,
        order: ListOrder,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryItem>> {
        let memories = self.memories.read().await;
        let Some(tenant) = memories.get(tenant_id) else {
            return Ok(Vec::new());
        };

        let mut items: Vec<MemoryItem> = tenant
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        drop(memories);

        match order {
            ListOrder::CreatedAtDesc => items.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            }),
            ListOrder::ImportanceAsc => items.sort_by(|a, b| {
                a.importance
                    .total_cmp(&b.importance)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            }),
            ListOrder::ImportanceDesc => items.sort_by(|a, b| {
                b.importance
                    .total_cmp(&a.importance)
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }

        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let memories = self.memories.read().await;
        let Some(tenant) = memories.get(tenant_id) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<ScoredResult> = tenant
            .values()
            .filter(|item| filter.matches(item))
            .filter_map(|item| {
                substring_score(&item.content, &query).map(|s| ScoredResult::new(item.id, s))
            })
            .collect();
        drop(memories);

        sort_ranked(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn update_access(&self, id: Uuid, tenant_id: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut memories = self.memories.write().await;
        match memories.get_mut(tenant_id).and_then(|t| t.get_mut(&id)) {
            Some(item) => {
                item.mark_accessed(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid, tenant_id: &str) -> Result<bool> {
        let removed = self
            .memories
            .write()
            .await
            .get_mut(tenant_id)
            .and_then(|tenant| tenant.remove(&id))
            .is_some();
        self.delete_vector(id, tenant_id).await?;
        Ok(removed)
    }

    async fn count(&self, tenant_id: &str, filter: &MemoryFilter) -> Result<usize> {
        Ok(self
            .memories
            .read()
            .await
            .get(tenant_id)
            .map_or(0, |tenant| {
                tenant.values().filter(|item| filter.matches(item)).count()
            }))
    }

    async fn delete_expired(&self, tenant_id: &str, filter: &MemoryFilter) -> Result<usize> {
        let now = self.clock.now();
        let removed = self
            .remove_where(tenant_id, |item| filter.matches(item) && item.is_expired(now))
            .await;
        if removed > 0 {
            debug!(tenant_id, removed, "Deleted expired memories");
        }
        Ok(removed)
    }

    async fn delete_below_importance(
        &self,
        tenant_id: &str,
        filter: &MemoryFilter,
        threshold: f64,
    ) -> Result<usize> {
        Ok(self
            .remove_where(tenant_id, |item| {
                filter.matches(item) && item.importance < threshold
            })
            .await)
    }

    async fn decay_importance(
        &self,
        tenant_id: &str,
        rate: f64,
        consider_access_stats: bool,
    ) -> Result<usize> {
        let now = self.clock.now();
        let mut memories = self.memories.write().await;
        let Some(tenant) = memories.get_mut(tenant_id) else {
            return Ok(0);
        };

        let mut updated = 0;
        for item in tenant.values_mut() {
            let days = consider_access_stats.then(|| {
                (now - item.reference_time()).num_seconds() as f64 / SECONDS_PER_DAY
            });
            let decayed = sweep_importance(item.importance, rate, days);
            if decayed != item.importance {
                item.importance = decayed.clamp(0.0, 1.0);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl VectorStore for InMemoryStorage {
    async fn store_vector(&self, entry: VectorEntry) -> Result<()> {
        let quantized = quantize(&entry.embedding)?;
        let bloom = bloom_fingerprint(&entry.tags);
        self.vectors
            .write()
            .await
            .entry(entry.tenant_id.clone())
            .or_default()
            .insert(
                entry.id,
                IndexedVector {
                    entry,
                    quantized,
                    bloom,
                },
            );
        Ok(())
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        tenant_id: &str,
        layer: Option<MemoryLayer>,
        threshold: Option<f64>,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        self.search_similar_tagged(
            embedding,
            tenant_id,
            layer,
            threshold,
            &BTreeSet::new(),
            limit,
        )
        .await
    }

    async fn search_similar_tagged(
        &self,
        embedding: &[f32],
        tenant_id: &str,
        layer: Option<MemoryLayer>,
        threshold: Option<f64>,
        tags: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        let query = quantize(embedding)?;
        let required = bloom_fingerprint(tags);

        let vectors = self.vectors.read().await;
        let Some(tenant) = vectors.get(tenant_id) else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for indexed in tenant.values() {
            if !bloom_may_contain(indexed.bloom, required) {
                continue;
            }
            if layer.is_some_and(|l| l != indexed.entry.layer) {
                continue;
            }
            if !tags.iter().all(|t| indexed.entry.tags.contains(t)) {
                continue;
            }
            if indexed.quantized.len() != query.len() {
                continue;
            }

            let score = cosine_similarity_fixed(&query, &indexed.quantized)?;
            if threshold.is_some_and(|t| score < t) {
                continue;
            }
            results.push(ScoredResult::new(indexed.entry.id, score));
        }
        drop(vectors);

        sort_ranked(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn delete_vector(&self, id: Uuid, tenant_id: &str) -> Result<bool> {
        Ok(self
            .vectors
            .write()
            .await
            .get_mut(tenant_id)
            .and_then(|tenant| tenant.remove(&id))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StrataError;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn create_test_storage() -> (InMemoryStorage, ManualClock) {
        let clock = ManualClock::new(t0());
        (InMemoryStorage::with_clock(Arc::new(clock.clone())), clock)
    }

    fn create_test_item(content: &str, layer: MemoryLayer, importance: f64) -> MemoryItem {
        MemoryItem::new("tenant", "agent", content, layer, importance, t0()).unwrap()
    }

    #[tokio::test]
    async fn test_store_and_get_is_tenant_scoped() {
        let (storage, _) = create_test_storage();
        let item = create_test_item("hello", MemoryLayer::Working, 0.5);
        let id = storage.store(item.clone()).await.unwrap();

        assert_eq!(storage.get(id, "tenant").await.unwrap(), Some(item));
        assert_eq!(storage.get(id, "other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_rejects_non_finite_embedding() {
        let (storage, _) = create_test_storage();
        let mut item = create_test_item("bad", MemoryLayer::Working, 0.5);
        item.embedding = Some(vec![0.1, f32::NAN]);
        assert!(matches!(
            storage.store(item).await,
            Err(StrataError::Quantization(_))
        ));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_importance_ascending_breaks_ties_by_age() {
        let (storage, _) = create_test_storage();
        let mut older = create_test_item("older", MemoryLayer::Working, 0.3);
        older.created_at = t0() - Duration::minutes(5);
        let newer = create_test_item("newer", MemoryLayer::Working, 0.3);
        let high = create_test_item("high", MemoryLayer::Working, 0.9);
        for item in [newer.clone(), high.clone(), older.clone()] {
            storage.store(item).await.unwrap();
        }

        let listed = storage
            .list("tenant", &MemoryFilter::new(), ListOrder::ImportanceAsc, None)
            .await
            .unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![older.id, newer.id, high.id]);
    }

    #[tokio::test]
    async fn test_text_search_scores_by_position() {
        let (storage, _) = create_test_storage();
        let early = create_test_item("rust is fast", MemoryLayer::Episodic, 0.5);
        let late = create_test_item("everyone says rust", MemoryLayer::Episodic, 0.5);
        let miss = create_test_item("python", MemoryLayer::Episodic, 0.5);
        for item in [early.clone(), late.clone(), miss] {
            storage.store(item).await.unwrap();
        }

        let results = storage
            .search("Rust", "tenant", &MemoryFilter::new(), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory_id, early.id);
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[1].memory_id, late.id);
    }

    #[tokio::test]
    async fn test_update_access_uses_clock() {
        let (storage, clock) = create_test_storage();
        let id = storage
            .store(create_test_item("x", MemoryLayer::Working, 0.5))
            .await
            .unwrap();
        clock.advance(Duration::seconds(30));

        assert!(storage.update_access(id, "tenant").await.unwrap());
        let item = storage.get(id, "tenant").await.unwrap().unwrap();
        assert_eq!(item.usage_count, 1);
        assert_eq!(item.last_accessed_at, Some(t0() + Duration::seconds(30)));
        assert!(!storage.update_access(Uuid::new_v4(), "tenant").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let (storage, clock) = create_test_storage();
        let mut expiring = create_test_item("short", MemoryLayer::Sensory, 0.5);
        expiring.expires_at = Some(t0() + Duration::seconds(10));
        let durable = create_test_item("long", MemoryLayer::Semantic, 0.5);
        storage.store(expiring.clone()).await.unwrap();
        storage.store(durable.clone()).await.unwrap();

        let filter = MemoryFilter::new();
        assert_eq!(storage.delete_expired("tenant", &filter).await.unwrap(), 0);
        clock.advance(Duration::seconds(11));
        assert_eq!(storage.delete_expired("tenant", &filter).await.unwrap(), 1);
        assert!(storage.get(expiring.id, "tenant").await.unwrap().is_none());
        assert!(storage.get(durable.id, "tenant").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_decay_importance_access_aware() {
        let (storage, clock) = create_test_storage();
        let id = storage
            .store(create_test_item("x", MemoryLayer::Episodic, 0.8))
            .await
            .unwrap();
        clock.advance(Duration::days(60));

        assert_eq!(storage.decay_importance("tenant", 0.1, true).await.unwrap(), 1);
        let item = storage.get(id, "tenant").await.unwrap().unwrap();
        assert!((item.importance - 0.8 * 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_vector_search_threshold_and_layer() {
        let (storage, _) = create_test_storage();
        let mut close = create_test_item("close", MemoryLayer::Semantic, 0.5);
        close.embedding = Some(vec![1.0, 0.1, 0.0]);
        let mut far = create_test_item("far", MemoryLayer::Semantic, 0.5);
        far.embedding = Some(vec![0.0, 0.0, 1.0]);
        let mut other_layer = create_test_item("other", MemoryLayer::Working, 0.5);
        other_layer.embedding = Some(vec![1.0, 0.0, 0.0]);
        for item in [close.clone(), far, other_layer] {
            storage.store(item).await.unwrap();
        }

        let results = storage
            .search_similar(&[1.0, 0.0, 0.0], "tenant", Some(MemoryLayer::Semantic), Some(0.5), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory_id, close.id);
    }

    #[tokio::test]
    async fn test_vector_search_tag_restriction() {
        let (storage, _) = create_test_storage();
        let mut tagged = create_test_item("tagged", MemoryLayer::Semantic, 0.5);
        tagged.embedding = Some(vec![1.0, 0.0]);
        tagged.tags.insert("rust".to_string());
        let mut untagged = create_test_item("untagged", MemoryLayer::Semantic, 0.5);
        untagged.embedding = Some(vec![1.0, 0.0]);
        storage.store(tagged.clone()).await.unwrap();
        storage.store(untagged).await.unwrap();

        let tags: BTreeSet<String> = ["rust".to_string()].into_iter().collect();
        let results = storage
            .search_similar_tagged(&[1.0, 0.0], "tenant", None, None, &tags, 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory_id, tagged.id);
    }

    #[tokio::test]
    async fn test_delete_removes_vector() {
        let (storage, _) = create_test_storage();
        let mut item = create_test_item("x", MemoryLayer::Semantic, 0.5);
        item.embedding = Some(vec![1.0, 0.0]);
        let id = storage.store(item).await.unwrap();

        assert!(storage.delete(id, "tenant").await.unwrap());
        let results = storage
            .search_similar(&[1.0, 0.0], "tenant", None, None, 10)
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(!storage.delete(id, "tenant").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_vector_operations() {
        let (storage, _) = create_test_storage();
        let entries: Vec<VectorEntry> = (0..3)
            .map(|i| VectorEntry {
                id: Uuid::from_u128(i),
                tenant_id: "tenant".to_string(),
                agent_id: "agent".to_string(),
                layer: MemoryLayer::Semantic,
                tags: BTreeSet::new(),
                embedding: vec![1.0, i as f32],
            })
            .collect();
        assert_eq!(storage.store_vectors(entries).await.unwrap(), 3);

        let ids = [Uuid::from_u128(0), Uuid::from_u128(1), Uuid::from_u128(99)];
        assert_eq!(storage.delete_vectors(&ids, "tenant").await.unwrap(), 2);
    }
}
