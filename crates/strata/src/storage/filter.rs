//! Filter types for memory storage and search operations
//!
//! Narrows a tenant's memories by agent, layer, tags, importance and
//! creation time.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::math::bloom_fingerprint;
use crate::memory::types::{MemoryItem, MemoryLayer};

/// Filter criteria for memory listing and search.
///
/// All fields are optional - when `None`, that filter is not applied.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilter {
    /// Restrict to one agent
    pub agent_id: Option<String>,
    /// Restrict to these layers (OR logic within this filter)
    pub layers: Option<Vec<MemoryLayer>>,
    /// Every tag listed must be present on the memory
    pub tags: Option<BTreeSet<String>>,
    /// Minimum importance threshold (inclusive)
    pub min_importance: Option<f64>,
    /// Only return memories created at or after this time
    pub since: Option<DateTime<Utc>>,
}

impl MemoryFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by agent
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Filter by layers
    pub fn with_layers(mut self, layers: Vec<MemoryLayer>) -> Self {
        self.layers = Some(layers);
        self
    }

    /// Filter by a single layer
    pub fn with_layer(self, layer: MemoryLayer) -> Self {
        self.with_layers(vec![layer])
    }

    /// Require tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Filter by minimum importance
    pub fn with_min_importance(mut self, min_importance: f64) -> Self {
        self.min_importance = Some(min_importance);
        self
    }

    /// Filter by creation time
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Returns true if no filters are set
    pub fn is_empty(&self) -> bool {
        self.agent_id.is_none()
            && self.layers.is_none()
            && self.tags.is_none()
            && self.min_importance.is_none()
            && self.since.is_none()
    }

    /// The only layer this filter admits, if it names exactly one
    pub fn single_layer(&self) -> Option<MemoryLayer> {
        match self.layers.as_deref() {
            Some([layer]) => Some(*layer),
            _ => None,
        }
    }

    /// Bloom mask of the required tags, zero when none are required
    pub fn tag_fingerprint(&self) -> u64 {
        self.tags.as_ref().map_or(0, |tags| bloom_fingerprint(tags))
    }

    /// Whether `item` passes every set criterion
    pub fn matches(&self, item: &MemoryItem) -> bool {
        if let Some(agent_id) = &self.agent_id {
            if &item.agent_id != agent_id {
                return false;
            }
        }

        if let Some(layers) = &self.layers {
            if !layers.is_empty() && !layers.contains(&item.layer) {
                return false;
            }
        }

        if let Some(tags) = &self.tags {
            if !tags.iter().all(|tag| item.tags.contains(tag)) {
                return false;
            }
        }

        if let Some(min_importance) = self.min_importance {
            if item.importance < min_importance {
                return false;
            }
        }

        if let Some(since) = self.since {
            if item.created_at < since {
                return false;
            }
        }

        true
    }

    /// Stable textual form, used to key cached results
    pub fn cache_fingerprint(&self) -> String {
        let layers = self
            .layers
            .as_ref()
            .map(|layers| {
                let mut names: Vec<&str> = layers.iter().map(MemoryLayer::as_str).collect();
                names.sort_unstable();
                names.dedup();
                names.join(",")
            })
            .unwrap_or_default();
        let tags = self
            .tags
            .as_ref()
            .map(|tags| tags.iter().cloned().collect::<Vec<_>>().join(","))
            .unwrap_or_default();

        format!(
            "agent={}|layers={}|tags={}|min={}|since={}",
            self.agent_id.as_deref().unwrap_or(""),
            layers,
            tags,
            self.min_importance.map(|v| v.to_string()).unwrap_or_default(),
            self.since.map(|t| t.timestamp_millis().to_string()).unwrap_or_default(),
        )
    }
}
