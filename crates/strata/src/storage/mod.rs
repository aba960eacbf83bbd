//! Storage contracts and the in-process adapter
//!
//! [`MemoryStorage`] owns memory items; [`VectorStore`] owns embeddings.
//! Concrete database adapters live outside this crate and plug in through
//! these traits.

pub mod filter;
pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::types::{MemoryItem, MemoryLayer, ScoredResult};

pub use filter::MemoryFilter;
pub use memory::InMemoryStorage;

/// Ordering for [`MemoryStorage::list`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListOrder {
    /// Newest first
    #[default]
    CreatedAtDesc,
    /// Least important first, oldest first among equals
    ImportanceAsc,
    /// Most important first, newest first among equals
    ImportanceDesc,
}

/// Persistent store for memory items, scoped by tenant
#[async_trait]
pub trait MemoryStorage: Send + Sync {
    /// Insert or replace an item, returning its id
    async fn store(&self, item: MemoryItem) -> Result<Uuid>;

    async fn get(&self, id: Uuid, tenant_id: &str) -> Result<Option<MemoryItem>>;

    async fn list(
        &self,
        tenant_id: &str,
        filter: &MemoryFilter,
        order: ListOrder,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryItem>>;

    /// Text search over content
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredResult>>;

    /// Bump `usage_count` and `last_accessed_at`. Returns false if missing.
    async fn update_access(&self, id: Uuid, tenant_id: &str) -> Result<bool>;

    /// Returns false if the item did not exist
    async fn delete(&self, id: Uuid, tenant_id: &str) -> Result<bool>;

    async fn count(&self, tenant_id: &str, filter: &MemoryFilter) -> Result<usize>;

    /// Remove matching items whose `expires_at` has passed
    async fn delete_expired(&self, tenant_id: &str, filter: &MemoryFilter) -> Result<usize>;

    /// Remove matching items with importance strictly below `threshold`
    async fn delete_below_importance(
        &self,
        tenant_id: &str,
        filter: &MemoryFilter,
        threshold: f64,
    ) -> Result<usize>;

    /// Multiply every tenant item's importance by `1 - rate`, optionally
    /// adjusting the rate by how recently the item was used.
    async fn decay_importance(
        &self,
        tenant_id: &str,
        rate: f64,
        consider_access_stats: bool,
    ) -> Result<usize>;
}

/// An embedding plus the metadata vector search filters on
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub agent_id: String,
    pub layer: MemoryLayer,
    pub tags: BTreeSet<String>,
    pub embedding: Vec<f32>,
}

impl VectorEntry {
    /// Entry for an item's embedding, if it has one
    pub fn from_item(item: &MemoryItem) -> Option<Self> {
        item.embedding.as_ref().map(|embedding| Self {
            id: item.id,
            tenant_id: item.tenant_id.clone(),
            agent_id: item.agent_id.clone(),
            layer: item.layer,
            tags: item.tags.clone(),
            embedding: embedding.clone(),
        })
    }
}

/// Similarity index over embeddings
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn store_vector(&self, entry: VectorEntry) -> Result<()>;

    /// Nearest neighbours of `embedding` within a tenant, best first
    async fn search_similar(
        &self,
        embedding: &[f32],
        tenant_id: &str,
        layer: Option<MemoryLayer>,
        threshold: Option<f64>,
        limit: usize,
    ) -> Result<Vec<ScoredResult>>;

    /// Like [`VectorStore::search_similar`] but restricted to entries
    /// carrying every tag in `tags`. Backends without tag metadata ignore
    /// the restriction.
    async fn search_similar_tagged(
        &self,
        embedding: &[f32],
        tenant_id: &str,
        layer: Option<MemoryLayer>,
        threshold: Option<f64>,
        _tags: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        self.search_similar(embedding, tenant_id, layer, threshold, limit)
            .await
    }

    async fn delete_vector(&self, id: Uuid, tenant_id: &str) -> Result<bool>;

    async fn store_vectors(&self, entries: Vec<VectorEntry>) -> Result<usize> {
        let mut stored = 0;
        for entry in entries {
            self.store_vector(entry).await?;
            stored += 1;
        }
        Ok(stored)
    }

    async fn delete_vectors(&self, ids: &[Uuid], tenant_id: &str) -> Result<usize> {
        let mut deleted = 0;
        for id in ids {
            if self.delete_vector(*id, tenant_id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
