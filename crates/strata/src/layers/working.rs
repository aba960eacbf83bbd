//! Working layer: a small focus set with an importance floor.
//!
//! Items below the floor are bumped up to it rather than rejected. Once
//! the layer holds more than `max_capacity` items the least important one
//! is evicted, oldest first among equals.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::layers::{LayerPolicy, LayerStore, OverflowPolicy, PruneRule};
use crate::memory::decay::DecayConfig;
use crate::memory::types::{MemoryItem, MemoryLayer, NewMemory};

pub type WorkingLayer = LayerStore<WorkingPolicy>;

#[derive(Debug, Clone)]
pub struct WorkingPolicy {
    pub max_capacity: usize,
    pub importance_threshold: f64,
    pub decay: DecayConfig,
}

impl WorkingPolicy {
    pub fn new(max_capacity: usize, importance_threshold: f64) -> Self {
        Self {
            max_capacity: max_capacity.max(1),
            importance_threshold: importance_threshold.clamp(0.0, 1.0),
            decay: DecayConfig::for_layer(MemoryLayer::Working),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            decay: config.decay.working,
            ..Self::new(
                config.layers.working.max_capacity,
                config.layers.working.importance_threshold,
            )
        }
    }
}

impl Default for WorkingPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LayerPolicy for WorkingPolicy {
    fn layer(&self) -> MemoryLayer {
        MemoryLayer::Working
    }

    fn default_importance(&self, _layer: MemoryLayer) -> f64 {
        self.importance_threshold
    }

    fn admit(&self, item: &mut MemoryItem, _now: DateTime<Utc>) -> Result<()> {
        item.importance = item.importance.max(self.importance_threshold);
        item.expires_at = None;
        Ok(())
    }

    fn overflow(&self) -> OverflowPolicy {
        OverflowPolicy::EvictLowestImportance {
            max_capacity: self.max_capacity,
        }
    }

    fn prune_rule(&self) -> Option<PruneRule> {
        Some(PruneRule::ImportanceBelow(self.importance_threshold))
    }

    fn decay(&self, _layer: MemoryLayer) -> Option<DecayConfig> {
        Some(self.decay)
    }
}

/// Snapshot of how full the working layer is
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CapacityStatus {
    pub current_count: usize,
    pub max_capacity: usize,
    pub available_slots: usize,
    pub is_full: bool,
    pub utilization_pct: f64,
}

impl LayerStore<WorkingPolicy> {
    pub async fn get_capacity_status(&self) -> Result<CapacityStatus> {
        let current_count = self.count().await?;
        let max_capacity = self.policy().max_capacity;
        Ok(CapacityStatus {
            current_count,
            max_capacity,
            available_slots: max_capacity.saturating_sub(current_count),
            is_full: current_count >= max_capacity,
            utilization_pct: current_count as f64 / max_capacity as f64 * 100.0,
        })
    }

    /// Copy a sensory item into working memory.
    ///
    /// The copy's importance is raised to the working threshold if needed.
    /// The sensory original is left to expire.
    pub async fn promote_to_working(&self, item: &MemoryItem) -> Result<MemoryItem> {
        if item.layer != MemoryLayer::Sensory {
            return Err(StrataError::Validation(format!(
                "only sensory memories can be promoted to working, got {}",
                item.layer
            )));
        }

        let mut draft = NewMemory::from_item(item);
        draft
            .metadata
            .insert("promoted_from".to_string(), Value::from(item.id.to_string()));
        draft
            .metadata
            .insert("source_layer".to_string(), Value::from(item.layer.as_str()));
        self.add(draft).await
    }
}
