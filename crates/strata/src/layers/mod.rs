//! Layered memory store
//!
//! One generic [`LayerStore`] handles CRUD for every layer. What differs
//! between layers (TTL, capacity, importance floor, pruning, decay) comes
//! from an injected [`LayerPolicy`]. Promotions between layers are explicit
//! calls on the typed stores in the submodules and always create a new item.

pub mod longterm;
pub mod reflective;
pub mod sensory;
pub mod working;

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{SharedClock, system_clock};
use crate::config::Config;
use crate::error::Result;
use crate::memory::decay::DecayConfig;
use crate::memory::types::{MemoryItem, MemoryLayer, NewMemory, ScoredResult};
use crate::storage::{ListOrder, MemoryFilter, MemoryStorage};

pub use longterm::{LongTermLayer, LongTermPolicy};
pub use reflective::{
    Reflection, ReflectionPriority, ReflectionType, ReflectiveLayer, ReflectivePolicy,
};
pub use sensory::{SensoryLayer, SensoryPolicy};
pub use working::{CapacityStatus, WorkingLayer, WorkingPolicy};

/// Metadata key recording the last importance decay sweep
pub const LAST_DECAYED_AT_KEY: &str = "last_decayed_at";

const SECONDS_PER_DAY: i64 = 86_400;

static SHARED_SCOPE_LOCKS: LazyLock<Arc<ScopeLocks>> = LazyLock::new(|| Arc::new(ScopeLocks::new()));

/// Serializes capacity-sensitive writes per `(tenant, agent)`.
///
/// Working-layer eviction is a count, pick, delete sequence; holding the
/// scope lock across it keeps concurrent writers from evicting twice or
/// overshooting capacity. Stores use the process-wide registry from
/// [`ScopeLocks::shared`] unless given another with `with_locks`.
#[derive(Debug, Default)]
pub struct ScopeLocks {
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry every store uses by default
    pub fn shared() -> Arc<ScopeLocks> {
        Arc::clone(&SHARED_SCOPE_LOCKS)
    }

    pub async fn acquire(&self, tenant_id: &str, agent_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry((tenant_id.to_string(), agent_id.to_string()))
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// What a layer does when an insert would exceed its capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// No capacity limit
    Unbounded,
    /// At capacity, sweep expired items before inserting
    SweepExpired { max_capacity: usize },
    /// Past capacity after inserting, evict the single least important item
    EvictLowestImportance { max_capacity: usize },
}

/// Which items `cleanup` removes beyond expired ones
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PruneRule {
    /// Importance strictly below the value
    ImportanceBelow(f64),
    /// Numeric `confidence` metadata strictly below the value
    ConfidenceBelow(f64),
}

/// Per-layer behaviour injected into [`LayerStore`]
pub trait LayerPolicy: Send + Sync {
    /// Layer new items are written to
    fn layer(&self) -> MemoryLayer;

    /// Layers this store reads from
    fn layers(&self) -> Vec<MemoryLayer> {
        vec![self.layer()]
    }

    /// Importance used when the caller does not give one
    fn default_importance(&self, _layer: MemoryLayer) -> f64 {
        0.5
    }

    /// Adjust or reject an item before it is stored
    fn admit(&self, _item: &mut MemoryItem, _now: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    fn overflow(&self) -> OverflowPolicy {
        OverflowPolicy::Unbounded
    }

    fn prune_rule(&self) -> Option<PruneRule> {
        None
    }

    /// Importance decay for items in `layer`, `None` for no decay
    fn decay(&self, layer: MemoryLayer) -> Option<DecayConfig>;
}

/// CRUD over one layer (or layer group) for a single tenant and agent
pub struct LayerStore<P: LayerPolicy> {
    storage: Arc<dyn MemoryStorage>,
    tenant_id: String,
    agent_id: String,
    policy: P,
    locks: Arc<ScopeLocks>,
    clock: SharedClock,
}

impl<P: LayerPolicy> LayerStore<P> {
    pub fn new(
        storage: Arc<dyn MemoryStorage>,
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        policy: P,
    ) -> Self {
        Self {
            storage,
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            policy,
            locks: ScopeLocks::shared(),
            clock: system_clock(),
        }
    }

    /// Use a private lock registry instead of the process-wide one
    pub fn with_locks(mut self, locks: Arc<ScopeLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Filter selecting this store's items
    pub fn scope_filter(&self) -> MemoryFilter {
        MemoryFilter::new()
            .with_agent(self.agent_id.clone())
            .with_layers(self.policy.layers())
    }

    fn owns(&self, item: &MemoryItem) -> bool {
        item.tenant_id == self.tenant_id
            && item.agent_id == self.agent_id
            && self.policy.layers().contains(&item.layer)
    }

    /// Store a new item in the policy's default layer
    pub async fn add(&self, draft: NewMemory) -> Result<MemoryItem> {
        self.insert(draft, self.policy.layer()).await
    }

    pub(crate) async fn insert(&self, draft: NewMemory, layer: MemoryLayer) -> Result<MemoryItem> {
        let now = self.clock.now();
        let importance = draft
            .importance
            .unwrap_or_else(|| self.policy.default_importance(layer));

        let mut item = MemoryItem::new(
            self.tenant_id.clone(),
            self.agent_id.clone(),
            draft.content,
            layer,
            importance,
            now,
        )?;
        item.tags = draft.tags;
        item.metadata = draft.metadata;
        item.embedding = draft.embedding;
        self.policy.admit(&mut item, now)?;

        match self.policy.overflow() {
            OverflowPolicy::Unbounded => {
                self.storage.store(item.clone()).await?;
            }
            OverflowPolicy::SweepExpired { max_capacity } => {
                let _guard = self.locks.acquire(&self.tenant_id, &self.agent_id).await;
                if self.count().await? >= max_capacity {
                    let swept = self
                        .storage
                        .delete_expired(&self.tenant_id, &self.scope_filter())
                        .await?;
                    debug!(layer = %layer, swept, "Capacity reached, swept expired memories");
                }
                self.storage.store(item.clone()).await?;
            }
            OverflowPolicy::EvictLowestImportance { max_capacity } => {
                let _guard = self.locks.acquire(&self.tenant_id, &self.agent_id).await;
                self.storage.store(item.clone()).await?;
                if self.count().await? > max_capacity {
                    self.evict_lowest().await?;
                }
            }
        }

        Ok(item)
    }

    /// Caller must hold the scope lock
    async fn evict_lowest(&self) -> Result<Option<Uuid>> {
        let victim = self
            .storage
            .list(
                &self.tenant_id,
                &self.scope_filter(),
                ListOrder::ImportanceAsc,
                Some(1),
            )
            .await?
            .into_iter()
            .next();

        let Some(victim) = victim else {
            return Ok(None);
        };
        self.storage.delete(victim.id, &self.tenant_id).await?;
        info!(
            memory_id = %victim.id,
            importance = victim.importance,
            agent_id = %self.agent_id,
            "Evicted least important memory"
        );
        Ok(Some(victim.id))
    }

    /// Fetch an item and record the access.
    ///
    /// Expired items are deleted on the spot and reported as missing.
    pub async fn get(&self, id: Uuid) -> Result<Option<MemoryItem>> {
        let Some(mut item) = self.storage.get(id, &self.tenant_id).await? else {
            return Ok(None);
        };
        if !self.owns(&item) {
            return Ok(None);
        }

        let now = self.clock.now();
        if item.is_expired(now) {
            self.storage.delete(id, &self.tenant_id).await?;
            debug!(memory_id = %id, "Deleted expired memory on read");
            return Ok(None);
        }

        self.storage.update_access(id, &self.tenant_id).await?;
        item.mark_accessed(now);
        Ok(Some(item))
    }

    /// Text search within this store's scope
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredResult>> {
        self.storage
            .search(query, &self.tenant_id, &self.scope_filter(), limit)
            .await
    }

    /// Newest first, skipping expired items
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<MemoryItem>> {
        let now = self.clock.now();
        let mut items = self
            .storage
            .list(
                &self.tenant_id,
                &self.scope_filter(),
                ListOrder::CreatedAtDesc,
                None,
            )
            .await?;
        items.retain(|item| !item.is_expired(now));
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    /// Delete an item owned by this store. Returns false if absent.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        match self.storage.get(id, &self.tenant_id).await? {
            Some(item) if self.owns(&item) => self.storage.delete(id, &self.tenant_id).await,
            _ => Ok(false),
        }
    }

    pub async fn count(&self) -> Result<usize> {
        self.storage
            .count(&self.tenant_id, &self.scope_filter())
            .await
    }

    pub(crate) async fn count_layer(&self, layer: MemoryLayer) -> Result<usize> {
        let filter = MemoryFilter::new()
            .with_agent(self.agent_id.clone())
            .with_layer(layer);
        self.storage.count(&self.tenant_id, &filter).await
    }

    /// Remove expired items plus whatever the policy's prune rule selects
    pub async fn cleanup(&self) -> Result<usize> {
        let filter = self.scope_filter();
        let mut removed = self.storage.delete_expired(&self.tenant_id, &filter).await?;

        match self.policy.prune_rule() {
            Some(PruneRule::ImportanceBelow(threshold)) => {
                removed += self
                    .storage
                    .delete_below_importance(&self.tenant_id, &filter, threshold)
                    .await?;
            }
            Some(PruneRule::ConfidenceBelow(threshold)) => {
                let items = self
                    .storage
                    .list(&self.tenant_id, &filter, ListOrder::CreatedAtDesc, None)
                    .await?;
                for item in items {
                    let confidence = item.metadata.get("confidence").and_then(Value::as_f64);
                    if confidence.is_some_and(|c| c < threshold)
                        && self.storage.delete(item.id, &self.tenant_id).await?
                    {
                        removed += 1;
                    }
                }
            }
            None => {}
        }

        if removed > 0 {
            debug!(agent_id = %self.agent_id, removed, "Layer cleanup");
        }
        Ok(removed)
    }

    /// Apply the policy's importance decay for every whole day elapsed
    /// since an item's last access or last sweep, whichever is later.
    pub async fn decay_sweep(&self) -> Result<usize> {
        let _guard = self.locks.acquire(&self.tenant_id, &self.agent_id).await;
        let now = self.clock.now();
        let items = self
            .storage
            .list(
                &self.tenant_id,
                &self.scope_filter(),
                ListOrder::CreatedAtDesc,
                None,
            )
            .await?;

        let mut updated = 0;
        for mut item in items {
            let Some(decay) = self.policy.decay(item.layer) else {
                continue;
            };
            if !decay.decays() {
                continue;
            }

            let since = last_decayed_at(&item)
                .map_or(item.reference_time(), |at| at.max(item.reference_time()));
            let days = (now - since).num_seconds() / SECONDS_PER_DAY;
            let Ok(periods) = u32::try_from(days) else {
                continue;
            };
            if periods == 0 {
                continue;
            }

            let decayed = decay.decay_importance(item.importance, periods);
            item.set_importance(decayed.clamp(0.0, 1.0))?;
            item.metadata
                .insert(LAST_DECAYED_AT_KEY.to_string(), Value::from(now.to_rfc3339()));
            self.storage.store(item).await?;
            updated += 1;
        }
        Ok(updated)
    }
}

fn last_decayed_at(item: &MemoryItem) -> Option<DateTime<Utc>> {
    item.metadata
        .get(LAST_DECAYED_AT_KEY)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// The four layer stores of one agent over shared storage
pub struct LayeredMemory {
    pub sensory: SensoryLayer,
    pub working: WorkingLayer,
    pub long_term: LongTermLayer,
    pub reflective: ReflectiveLayer,
}

impl LayeredMemory {
    pub fn new(
        storage: Arc<dyn MemoryStorage>,
        tenant_id: &str,
        agent_id: &str,
        config: &Config,
        clock: SharedClock,
    ) -> Self {
        Self {
            sensory: scoped(&storage, tenant_id, agent_id, SensoryPolicy::from_config(config))
                .with_clock(clock.clone()),
            working: scoped(&storage, tenant_id, agent_id, WorkingPolicy::from_config(config))
                .with_clock(clock.clone()),
            long_term: scoped(&storage, tenant_id, agent_id, LongTermPolicy::from_config(config))
                .with_clock(clock.clone()),
            reflective: scoped(&storage, tenant_id, agent_id, ReflectivePolicy::from_config(config))
                .with_clock(clock),
        }
    }

    /// Run every layer's cleanup concurrently, returning the total removed
    pub async fn cleanup(&self) -> Result<usize> {
        let (sensory, working, long_term, reflective) = futures::try_join!(
            self.sensory.cleanup(),
            self.working.cleanup(),
            self.long_term.cleanup(),
            self.reflective.cleanup(),
        )?;
        Ok(sensory + working + long_term + reflective)
    }

    /// Run every layer's importance decay sweep
    pub async fn decay_sweep(&self) -> Result<usize> {
        Ok(self.sensory.decay_sweep().await?
            + self.working.decay_sweep().await?
            + self.long_term.decay_sweep().await?
            + self.reflective.decay_sweep().await?)
    }
}

fn scoped<P: LayerPolicy>(
    storage: &Arc<dyn MemoryStorage>,
    tenant_id: &str,
    agent_id: &str,
    policy: P,
) -> LayerStore<P> {
    LayerStore::new(storage.clone(), tenant_id, agent_id, policy)
}
