//! Long-term layer covering episodic and semantic memories

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::layers::{LayerPolicy, LayerStore, PruneRule};
use crate::math::provenance_hash;
use crate::memory::decay::DecayConfig;
use crate::memory::types::{MemoryItem, MemoryLayer, NewMemory};

pub type LongTermLayer = LayerStore<LongTermPolicy>;

/// Importance added when a working memory is consolidated
pub const CONSOLIDATION_BOOST: f64 = 0.2;
/// Importance added when an episode is generalized into a fact
pub const SEMANTIC_UPGRADE_BOOST: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct LongTermPolicy {
    pub prune_below: f64,
    pub episodic_decay: DecayConfig,
    pub semantic_decay: DecayConfig,
}

impl LongTermPolicy {
    pub fn new(prune_below: f64) -> Self {
        Self {
            prune_below,
            episodic_decay: DecayConfig::for_layer(MemoryLayer::Episodic),
            semantic_decay: DecayConfig::for_layer(MemoryLayer::Semantic),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            prune_below: config.layers.long_term.prune_below,
            episodic_decay: config.decay.episodic,
            semantic_decay: config.decay.semantic,
        }
    }
}

impl Default for LongTermPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LayerPolicy for LongTermPolicy {
    fn layer(&self) -> MemoryLayer {
        MemoryLayer::Episodic
    }

    fn layers(&self) -> Vec<MemoryLayer> {
        vec![MemoryLayer::Episodic, MemoryLayer::Semantic]
    }

    fn default_importance(&self, layer: MemoryLayer) -> f64 {
        match layer {
            MemoryLayer::Semantic => 0.7,
            _ => 0.5,
        }
    }

    fn admit(&self, item: &mut MemoryItem, _now: DateTime<Utc>) -> Result<()> {
        let is_semantic = item.layer == MemoryLayer::Semantic;
        item.expires_at = None;
        item.metadata
            .insert("is_semantic".to_string(), Value::Bool(is_semantic));
        item.metadata.insert(
            "memory_subtype".to_string(),
            Value::from(item.layer.as_str()),
        );
        Ok(())
    }

    fn prune_rule(&self) -> Option<PruneRule> {
        Some(PruneRule::ImportanceBelow(self.prune_below))
    }

    fn decay(&self, layer: MemoryLayer) -> Option<DecayConfig> {
        match layer {
            MemoryLayer::Semantic => Some(self.semantic_decay),
            _ => Some(self.episodic_decay),
        }
    }
}

impl LayerStore<LongTermPolicy> {
    /// Store directly as an episode or a fact
    pub async fn add_memory(&self, draft: NewMemory, is_semantic: bool) -> Result<MemoryItem> {
        let layer = if is_semantic {
            MemoryLayer::Semantic
        } else {
            MemoryLayer::Episodic
        };
        self.insert(draft, layer).await
    }

    /// Copy a working memory into long-term storage with a +0.2 boost.
    ///
    /// Exactly one item is written, in the semantic layer when
    /// `as_semantic` is set and the episodic layer otherwise.
    pub async fn consolidate_from_working(
        &self,
        item: &MemoryItem,
        as_semantic: bool,
    ) -> Result<MemoryItem> {
        if item.layer != MemoryLayer::Working {
            return Err(StrataError::Validation(format!(
                "only working memories can be consolidated, got {}",
                item.layer
            )));
        }

        let mut draft = NewMemory::from_item(item)
            .with_importance((item.importance + CONSOLIDATION_BOOST).min(1.0));
        draft
            .metadata
            .insert("consolidated_from".to_string(), Value::from(item.id.to_string()));
        draft
            .metadata
            .insert("source_layer".to_string(), Value::from(item.layer.as_str()));

        let target = if as_semantic {
            MemoryLayer::Semantic
        } else {
            MemoryLayer::Episodic
        };
        self.insert(draft, target).await
    }

    /// Generalize an episode into a new semantic memory.
    ///
    /// The fact gets `generalized_content`, importance +0.1, and a
    /// `derived_from_episodic` record with the episode's provenance hash.
    /// The episode itself is kept.
    pub async fn upgrade_to_semantic(
        &self,
        episode: &MemoryItem,
        generalized_content: String,
    ) -> Result<MemoryItem> {
        if episode.layer != MemoryLayer::Episodic {
            return Err(StrataError::Validation(format!(
                "only episodic memories can be upgraded, got {}",
                episode.layer
            )));
        }
        if generalized_content.trim().is_empty() {
            return Err(StrataError::Validation(
                "generalized content must not be empty".to_string(),
            ));
        }

        let source_hash = provenance_hash(&serde_json::to_value(episode)?, &[]);
        let mut draft = NewMemory::from_item(episode)
            .with_importance((episode.importance + SEMANTIC_UPGRADE_BOOST).min(1.0));
        draft.content = generalized_content;
        draft.metadata.insert(
            "derived_from_episodic".to_string(),
            json!({
                "episode_id": episode.id.to_string(),
                "original_content": episode.content,
                "provenance_hash": source_hash,
            }),
        );

        self.insert(draft, MemoryLayer::Semantic).await
    }

    pub async fn count_episodic(&self) -> Result<usize> {
        self.count_layer(MemoryLayer::Episodic).await
    }

    pub async fn count_semantic(&self) -> Result<usize> {
        self.count_layer(MemoryLayer::Semantic).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::storage::InMemoryStorage;
    use std::sync::Arc;

    fn create_test_layer() -> (LongTermLayer, ManualClock) {
        let clock = ManualClock::default();
        let storage = Arc::new(InMemoryStorage::with_clock(Arc::new(clock.clone())));
        let layer = LayerStore::new(storage, "tenant", "agent", LongTermPolicy::new(0.1))
            .with_clock(Arc::new(clock.clone()));
        (layer, clock)
    }

    fn create_test_working_item(clock: &ManualClock, importance: f64) -> MemoryItem {
        MemoryItem::new(
            "tenant",
            "agent",
            "met Ana at the conference",
            MemoryLayer::Working,
            importance,
            clock.now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_memory_defaults() {
        let (layer, _) = create_test_layer();
        let fact = layer.add_memory(NewMemory::new("water boils at 100C"), true).await.unwrap();
        let episode = layer.add_memory(NewMemory::new("boiled water"), false).await.unwrap();

        assert_eq!(fact.layer, MemoryLayer::Semantic);
        assert_eq!(fact.importance, 0.7);
        assert_eq!(fact.metadata.get("memory_subtype"), Some(&Value::from("semantic")));
        assert_eq!(episode.layer, MemoryLayer::Episodic);
        assert_eq!(episode.importance, 0.5);
        assert_eq!(episode.metadata.get("is_semantic"), Some(&Value::Bool(false)));

        assert_eq!(layer.count_semantic().await.unwrap(), 1);
        assert_eq!(layer.count_episodic().await.unwrap(), 1);
        assert_eq!(layer.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_consolidate_boosts_importance() {
        let (layer, clock) = create_test_layer();
        let working = create_test_working_item(&clock, 0.6);
        let episode = layer.consolidate_from_working(&working, false).await.unwrap();

        assert_ne!(episode.id, working.id);
        assert_eq!(episode.layer, MemoryLayer::Episodic);
        assert!((episode.importance - 0.8).abs() < 1e-12);
        assert_eq!(episode.content, working.content);

        let capped = create_test_working_item(&clock, 0.95);
        let episode = layer.consolidate_from_working(&capped, false).await.unwrap();
        assert_eq!(episode.importance, 1.0);
    }

    #[tokio::test]
    async fn test_consolidate_as_semantic() {
        let (layer, clock) = create_test_layer();
        let working = create_test_working_item(&clock, 0.5);
        let fact = layer.consolidate_from_working(&working, true).await.unwrap();

        assert_eq!(fact.layer, MemoryLayer::Semantic);
        assert!((fact.importance - 0.7).abs() < 1e-12);
        assert_eq!(
            fact.metadata.get("consolidated_from"),
            Some(&Value::from(working.id.to_string()))
        );
        assert_eq!(layer.count_episodic().await.unwrap(), 0);
        assert_eq!(layer.count_semantic().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_consolidate_rejects_non_working() {
        let (layer, clock) = create_test_layer();
        let mut item = create_test_working_item(&clock, 0.5);
        item.layer = MemoryLayer::Sensory;
        assert!(layer.consolidate_from_working(&item, false).await.is_err());
    }

    #[tokio::test]
    async fn test_upgrade_records_provenance() {
        let (layer, _) = create_test_layer();
        let episode = layer
            .add_memory(NewMemory::new("Ana said she prefers tea").with_importance(0.6), false)
            .await
            .unwrap();
        let fact = layer
            .upgrade_to_semantic(&episode, "Ana prefers tea".to_string())
            .await
            .unwrap();

        assert_eq!(fact.content, "Ana prefers tea");
        assert!((fact.importance - 0.7).abs() < 1e-12);
        let derived = fact.metadata.get("derived_from_episodic").unwrap();
        assert_eq!(derived["episode_id"], Value::from(episode.id.to_string()));
        assert_eq!(derived["original_content"], Value::from("Ana said she prefers tea"));
        assert_eq!(derived["provenance_hash"].as_str().unwrap().len(), 64);

        // the episode survives the upgrade
        assert!(layer.get(episode.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upgrade_rejects_empty_content() {
        let (layer, _) = create_test_layer();
        let episode = layer.add_memory(NewMemory::new("x"), false).await.unwrap();
        assert!(matches!(
            layer.upgrade_to_semantic(&episode, "  ".to_string()).await,
            Err(StrataError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_prunes_faded_memories() {
        let (layer, _) = create_test_layer();
        layer
            .add_memory(NewMemory::new("barely remembered").with_importance(0.05), false)
            .await
            .unwrap();
        layer.add_memory(NewMemory::new("kept"), true).await.unwrap();
        assert_eq!(layer.cleanup().await.unwrap(), 1);
        assert_eq!(layer.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_decay_sweep_uses_whole_days() {
        let (layer, clock) = create_test_layer();
        let episode = layer.add_memory(NewMemory::new("e"), false).await.unwrap();

        clock.advance(chrono::Duration::hours(23));
        assert_eq!(layer.decay_sweep().await.unwrap(), 0);

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(layer.decay_sweep().await.unwrap(), 1);
        // a second sweep the same day is a no-op
        assert_eq!(layer.decay_sweep().await.unwrap(), 0);

        let stored = layer.get(episode.id).await.unwrap().unwrap();
        let expected = DecayConfig::for_layer(MemoryLayer::Episodic).decay_importance(0.5, 1);
        assert!((stored.importance - expected).abs() < 1e-12);
    }
}
