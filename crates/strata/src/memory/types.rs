//! Memory types for the Strata system
//!
//! Defines the stored unit ([`MemoryItem`]), the lifecycle layer it lives
//! in, and the `(id, score)` pairs strategies hand back.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, StrataError};

/// Open key/value metadata attached to a memory
pub type Metadata = Map<String, Value>;

/// Lifecycle tier of a memory item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLayer {
    /// Short-lived raw input with a TTL
    Sensory,
    /// Small, capacity-bounded focus set
    Working,
    /// What happened
    Episodic,
    /// Generalized facts
    Semantic,
    /// Insights derived from several other memories
    Reflective,
}

impl MemoryLayer {
    pub const ALL: [MemoryLayer; 5] = [
        MemoryLayer::Sensory,
        MemoryLayer::Working,
        MemoryLayer::Episodic,
        MemoryLayer::Semantic,
        MemoryLayer::Reflective,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLayer::Sensory => "sensory",
            MemoryLayer::Working => "working",
            MemoryLayer::Episodic => "episodic",
            MemoryLayer::Semantic => "semantic",
            MemoryLayer::Reflective => "reflective",
        }
    }

    /// Episodic and semantic together form long-term memory
    pub fn is_long_term(&self) -> bool {
        matches!(self, MemoryLayer::Episodic | MemoryLayer::Semantic)
    }
}

impl fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryLayer {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sensory" => Ok(MemoryLayer::Sensory),
            "working" => Ok(MemoryLayer::Working),
            "episodic" => Ok(MemoryLayer::Episodic),
            "semantic" => Ok(MemoryLayer::Semantic),
            "reflective" => Ok(MemoryLayer::Reflective),
            other => Err(StrataError::Validation(format!("unknown layer '{other}'"))),
        }
    }
}

/// A single memory unit stored in the Strata system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier for this memory
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: String,
    /// Owning agent within the tenant
    pub agent_id: String,
    /// Text payload, immutable once created
    pub content: String,
    /// Optional embedding produced by an external provider
    pub embedding: Option<Vec<f32>>,
    /// Which lifecycle layer this memory is in
    pub layer: MemoryLayer,
    /// Importance in `[0.0, 1.0]`
    pub importance: f64,
    /// Unordered tag set
    pub tags: BTreeSet<String>,
    /// Free-form metadata
    pub metadata: Metadata,
    /// When this memory was created
    pub created_at: DateTime<Utc>,
    /// When this memory was last read
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// How many reads counted as access
    pub usage_count: u64,
    /// Expiry instant, only used by the sensory layer
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryItem {
    /// Create a new memory, rejecting out-of-range importance
    pub fn new(
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        content: impl Into<String>,
        layer: MemoryLayer,
        importance: f64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        validate_importance(importance)?;
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            content: content.into(),
            embedding: None,
            layer,
            importance,
            tags: BTreeSet::new(),
            metadata: Metadata::new(),
            created_at: now,
            last_accessed_at: None,
            usage_count: 0,
            expires_at: None,
        })
    }

    /// Re-check invariants, e.g. after deserializing from a backend
    pub fn validate(&self) -> Result<()> {
        validate_importance(self.importance)?;
        if let Some(embedding) = &self.embedding {
            if embedding.is_empty() {
                return Err(StrataError::Validation(
                    "embedding must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Update importance, rejecting out-of-range values
    pub fn set_importance(&mut self, importance: f64) -> Result<()> {
        validate_importance(importance)?;
        self.importance = importance;
        Ok(())
    }

    /// Record a read
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.usage_count += 1;
        self.last_accessed_at = Some(now);
    }

    /// True when `expires_at` is set and not after `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Reference instant for recency: last access, else creation
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.created_at)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Fields for a memory that has not been placed in a layer yet.
///
/// Layers fill in tenant, agent, layer and timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub content: String,
    /// `None` lets the layer pick its default
    pub importance: Option<f64>,
    pub tags: BTreeSet<String>,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Carry an existing item's payload over into a new one
    pub fn from_item(item: &MemoryItem) -> Self {
        Self {
            content: item.content.clone(),
            importance: Some(item.importance),
            tags: item.tags.clone(),
            metadata: item.metadata.clone(),
            embedding: item.embedding.clone(),
        }
    }
}

/// A memory id with a strategy-local score.
///
/// Scores from different strategies are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    #[serde(rename = "id")]
    pub memory_id: Uuid,
    pub score: f64,
}

impl ScoredResult {
    pub fn new(memory_id: Uuid, score: f64) -> Self {
        Self { memory_id, score }
    }
}

/// Sort by score descending, then id ascending, so equal scores
/// always come out in the same order.
pub fn sort_ranked(results: &mut [ScoredResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
}

fn validate_importance(importance: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&importance) {
        return Err(StrataError::Validation(format!(
            "importance {importance} outside [0.0, 1.0]"
        )));
    }
    Ok(())
}
