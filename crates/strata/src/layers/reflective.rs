//! Reflective layer: insights derived from several other memories.
//!
//! Every reflection cites its sources and carries a provenance hash over
//! its own content and the sources' hashes. Reflections never decay.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::layers::{LayerPolicy, LayerStore, PruneRule};
use crate::math::provenance_hash;
use crate::memory::decay::DecayConfig;
use crate::memory::types::{MemoryItem, MemoryLayer, NewMemory};

pub type ReflectiveLayer = LayerStore<ReflectivePolicy>;

const SOURCES_KEY: &str = "source_memory_ids";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectionType {
    Insight,
    Analysis,
    Pattern,
    Meta,
    Synthesis,
    Contradiction,
}

impl ReflectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReflectionType::Insight => "insight",
            ReflectionType::Analysis => "analysis",
            ReflectionType::Pattern => "pattern",
            ReflectionType::Meta => "meta",
            ReflectionType::Synthesis => "synthesis",
            ReflectionType::Contradiction => "contradiction",
        }
    }
}

impl fmt::Display for ReflectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReflectionType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insight" => Ok(ReflectionType::Insight),
            "analysis" => Ok(ReflectionType::Analysis),
            "pattern" => Ok(ReflectionType::Pattern),
            "meta" => Ok(ReflectionType::Meta),
            "synthesis" => Ok(ReflectionType::Synthesis),
            "contradiction" => Ok(ReflectionType::Contradiction),
            other => Err(StrataError::Validation(format!(
                "unknown reflection type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectionPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl ReflectionPriority {
    /// Importance a reflection of this priority is stored with
    pub fn importance(&self) -> f64 {
        match self {
            ReflectionPriority::Low => 0.6,
            ReflectionPriority::Medium => 0.7,
            ReflectionPriority::High => 0.85,
            ReflectionPriority::Critical => 0.95,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReflectionPriority::Low => "low",
            ReflectionPriority::Medium => "medium",
            ReflectionPriority::High => "high",
            ReflectionPriority::Critical => "critical",
        }
    }
}

/// A reflection waiting to be stored
#[derive(Debug, Clone)]
pub struct Reflection {
    pub content: String,
    pub reflection_type: ReflectionType,
    pub priority: ReflectionPriority,
    pub source_memory_ids: Vec<Uuid>,
    pub confidence: f64,
    pub tags: BTreeSet<String>,
    pub embedding: Option<Vec<f32>>,
}

impl Reflection {
    pub fn new(
        content: impl Into<String>,
        reflection_type: ReflectionType,
        source_memory_ids: Vec<Uuid>,
    ) -> Self {
        Self {
            content: content.into(),
            reflection_type,
            priority: ReflectionPriority::default(),
            source_memory_ids,
            confidence: 1.0,
            tags: BTreeSet::new(),
            embedding: None,
        }
    }

    pub fn with_priority(mut self, priority: ReflectionPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
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

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ReflectivePolicy {
    pub min_source_memories: usize,
    pub min_confidence: f64,
}

impl ReflectivePolicy {
    pub fn new(min_source_memories: usize, min_confidence: f64) -> Self {
        Self {
            min_source_memories,
            min_confidence,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.layers.reflective.min_source_memories,
            config.layers.reflective.min_confidence,
        )
    }
}

impl Default for ReflectivePolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Distinct source ids listed in a reflection's metadata
fn cited_sources(item: &MemoryItem) -> BTreeSet<String> {
    item.metadata
        .get(SOURCES_KEY)
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl LayerPolicy for ReflectivePolicy {
    fn layer(&self) -> MemoryLayer {
        MemoryLayer::Reflective
    }

    fn default_importance(&self, _layer: MemoryLayer) -> f64 {
        0.8
    }

    fn admit(&self, item: &mut MemoryItem, _now: DateTime<Utc>) -> Result<()> {
        let sources = cited_sources(item).len();
        if sources < self.min_source_memories {
            return Err(StrataError::Validation(format!(
                "reflection needs at least {} source memories, got {sources}",
                self.min_source_memories
            )));
        }
        item.expires_at = None;
        Ok(())
    }

    fn prune_rule(&self) -> Option<PruneRule> {
        Some(PruneRule::ConfidenceBelow(self.min_confidence))
    }

    fn decay(&self, _layer: MemoryLayer) -> Option<DecayConfig> {
        None
    }
}

impl LayerStore<ReflectivePolicy> {
    /// Store a reflection citing at least `min_source_memories` distinct
    /// sources.
    pub async fn add_reflection(&self, reflection: Reflection) -> Result<MemoryItem> {
        if !(0.0..=1.0).contains(&reflection.confidence) {
            return Err(StrataError::Validation(format!(
                "confidence {} outside [0.0, 1.0]",
                reflection.confidence
            )));
        }

        let sources: BTreeSet<Uuid> = reflection.source_memory_ids.iter().copied().collect();
        if sources.len() < self.policy().min_source_memories {
            return Err(StrataError::Validation(format!(
                "reflection needs at least {} source memories, got {}",
                self.policy().min_source_memories,
                sources.len()
            )));
        }

        let mut source_hashes = Vec::with_capacity(sources.len());
        for id in &sources {
            source_hashes.push(self.source_hash(*id).await?);
        }
        let hash = provenance_hash(
            &json!({
                "content": reflection.content,
                "reflection_type": reflection.reflection_type.as_str(),
            }),
            &source_hashes,
        );

        let source_ids: Vec<Value> = sources.iter().map(|id| Value::from(id.to_string())).collect();
        let mut draft = NewMemory::new(reflection.content)
            .with_importance(reflection.priority.importance())
            .with_tags(reflection.tags)
            .with_metadata("reflection_type", reflection.reflection_type.as_str())
            .with_metadata("priority", reflection.priority.as_str())
            .with_metadata(SOURCES_KEY, source_ids)
            .with_metadata("confidence", reflection.confidence)
            .with_metadata("provenance_hash", hash);
        draft.embedding = reflection.embedding;

        let item = self.add(draft).await?;
        debug!(
            memory_id = %item.id,
            reflection_type = %reflection.reflection_type,
            sources = sources.len(),
            "Stored reflection"
        );
        Ok(item)
    }

    /// A source's recorded provenance hash, else a hash of its current
    /// state, else its id when it no longer exists.
    async fn source_hash(&self, id: Uuid) -> Result<String> {
        let Some(source) = self.storage.get(id, &self.tenant_id).await? else {
            return Ok(id.to_string());
        };
        if let Some(hash) = source.metadata.get("provenance_hash").and_then(Value::as_str) {
            return Ok(hash.to_string());
        }
        Ok(provenance_hash(&serde_json::to_value(&source)?, &[]))
    }

    pub async fn get_reflections_by_type(
        &self,
        reflection_type: ReflectionType,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryItem>> {
        let mut reflections: Vec<MemoryItem> = self
            .list(None)
            .await?
            .into_iter()
            .filter(|item| {
                item.metadata.get("reflection_type").and_then(Value::as_str)
                    == Some(reflection_type.as_str())
            })
            .collect();
        if let Some(limit) = limit {
            reflections.truncate(limit);
        }
        Ok(reflections)
    }

    pub async fn find_contradictions(&self) -> Result<Vec<MemoryItem>> {
        self.get_reflections_by_type(ReflectionType::Contradiction, None)
            .await
    }

    pub async fn find_patterns(&self) -> Result<Vec<MemoryItem>> {
        self.get_reflections_by_type(ReflectionType::Pattern, None).await
    }

    /// Reflections citing `memory_id` as a source
    pub async fn get_reflections_citing(&self, memory_id: Uuid) -> Result<Vec<MemoryItem>> {
        let id = memory_id.to_string();
        Ok(self
            .list(None)
            .await?
            .into_iter()
            .filter(|item| cited_sources(item).contains(&id))
            .collect())
    }
}
