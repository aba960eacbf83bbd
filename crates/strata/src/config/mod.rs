use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, StrataError};
use crate::memory::decay::DecayConfig;
use crate::memory::scoring::ScoringWeights;
use crate::memory::types::MemoryLayer;

/// Main configuration structure for Strata
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Relevance/importance/recency weights
    #[serde(default)]
    pub scoring: ScoringWeights,
    /// Per-layer decay settings
    #[serde(default)]
    pub decay: LayerDecayConfig,
    /// Per-layer capacity, TTL and pruning settings
    #[serde(default)]
    pub layers: LayersConfig,
    /// Hybrid search settings
    #[serde(default)]
    pub search: SearchConfig,
    /// Search result cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load from `path`, or from the first default location that exists.
    ///
    /// Falls back to defaults when no file is found. An explicit path that
    /// does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_paths().into_iter().find(|p| p.exists()),
        };

        let Some(path) = path else {
            debug!("No config file found, using defaults");
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&contents)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scoring.check_sum();
        let ScoringWeights { alpha, beta, gamma } = self.scoring;
        if alpha < 0.0 || beta < 0.0 || gamma < 0.0 {
            return Err(StrataError::Config(
                "scoring weights must be non-negative".to_string(),
            ));
        }
        if let Some((name, weight)) = self.search.weights.iter().find(|(_, w)| **w < 0.0) {
            return Err(StrataError::Config(format!(
                "search weight for '{name}' is negative: {weight}"
            )));
        }
        if self.search.rrf_k <= 0.0 {
            return Err(StrataError::Config("search.rrf_k must be positive".to_string()));
        }
        if self.layers.working.max_capacity == 0 {
            return Err(StrataError::Config(
                "layers.working.max_capacity must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            (
                "layers.working.importance_threshold",
                self.layers.working.importance_threshold,
            ),
            ("layers.long_term.prune_below", self.layers.long_term.prune_below),
            ("layers.reflective.min_confidence", self.layers.reflective.min_confidence),
            ("search.keyword_blend", self.search.keyword_blend),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(StrataError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// `./strata.toml`, then the platform config dir, then `~/.strata`
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("strata.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("strata").join("config.toml"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".strata").join("config.toml"));
    }
    paths
}

/// Decay settings keyed by layer
#[derive(Debug, Clone, Deserialize)]
pub struct LayerDecayConfig {
    #[serde(default = "default_sensory_decay")]
    pub sensory: DecayConfig,
    #[serde(default = "default_working_decay")]
    pub working: DecayConfig,
    #[serde(default = "default_episodic_decay")]
    pub episodic: DecayConfig,
    #[serde(default = "default_semantic_decay")]
    pub semantic: DecayConfig,
    #[serde(default = "default_reflective_decay")]
    pub reflective: DecayConfig,
}

impl LayerDecayConfig {
    pub fn for_layer(&self, layer: MemoryLayer) -> &DecayConfig {
        match layer {
            MemoryLayer::Sensory => &self.sensory,
            MemoryLayer::Working => &self.working,
            MemoryLayer::Episodic => &self.episodic,
            MemoryLayer::Semantic => &self.semantic,
            MemoryLayer::Reflective => &self.reflective,
        }
    }
}

impl Default for LayerDecayConfig {
    fn default() -> Self {
        Self {
            sensory: default_sensory_decay(),
            working: default_working_decay(),
            episodic: default_episodic_decay(),
            semantic: default_semantic_decay(),
            reflective: default_reflective_decay(),
        }
    }
}

fn default_sensory_decay() -> DecayConfig {
    DecayConfig::for_layer(MemoryLayer::Sensory)
}

fn default_working_decay() -> DecayConfig {
    DecayConfig::for_layer(MemoryLayer::Working)
}

fn default_episodic_decay() -> DecayConfig {
    DecayConfig::for_layer(MemoryLayer::Episodic)
}

fn default_semantic_decay() -> DecayConfig {
    DecayConfig::for_layer(MemoryLayer::Semantic)
}

fn default_reflective_decay() -> DecayConfig {
    DecayConfig::for_layer(MemoryLayer::Reflective)
}

/// Layer policy settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LayersConfig {
    #[serde(default)]
    pub sensory: SensoryConfig,
    #[serde(default)]
    pub working: WorkingConfig,
    #[serde(default)]
    pub long_term: LongTermConfig,
    #[serde(default)]
    pub reflective: ReflectiveConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensoryConfig {
    /// Seconds before a sensory item expires
    #[serde(default = "default_sensory_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Item count that triggers an expired sweep before insert
    #[serde(default = "default_sensory_max_capacity")]
    pub max_capacity: usize,
}

impl Default for SensoryConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_sensory_ttl_seconds(),
            max_capacity: default_sensory_max_capacity(),
        }
    }
}

fn default_sensory_ttl_seconds() -> u64 {
    300
}

fn default_sensory_max_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkingConfig {
    /// Items kept before the least important one is evicted
    #[serde(default = "default_working_max_capacity")]
    pub max_capacity: usize,
    /// Importance floor; lower items are bumped up to it
    #[serde(default = "default_working_importance_threshold")]
    pub importance_threshold: f64,
}

impl Default for WorkingConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_working_max_capacity(),
            importance_threshold: default_working_importance_threshold(),
        }
    }
}

fn default_working_max_capacity() -> usize {
    7
}

fn default_working_importance_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LongTermConfig {
    /// Cleanup removes items whose importance fell below this
    #[serde(default = "default_long_term_prune_below")]
    pub prune_below: f64,
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self {
            prune_below: default_long_term_prune_below(),
        }
    }
}

fn default_long_term_prune_below() -> f64 {
    0.1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReflectiveConfig {
    /// Distinct sources a reflection must cite
    #[serde(default = "default_min_source_memories")]
    pub min_source_memories: usize,
    /// Cleanup removes reflections less confident than this
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for ReflectiveConfig {
    fn default() -> Self {
        Self {
            min_source_memories: default_min_source_memories(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_min_source_memories() -> usize {
    3
}

fn default_min_confidence() -> f64 {
    0.3
}

/// How per-strategy rankings are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    #[default]
    Rrf,
    ConfidenceWeighted,
}

/// Hybrid search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Per-strategy timeout in milliseconds
    #[serde(default = "default_strategy_timeout_ms")]
    pub strategy_timeout_ms: u64,
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
    /// Fused candidates handed to the reranker
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    #[serde(default)]
    pub fusion: FusionMethod,
    /// RRF smoothing constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Minimum cosine similarity for vector hits
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f64,
    /// Share of keyword overlap mixed into importance/recency scores
    #[serde(default = "default_keyword_blend")]
    pub keyword_blend: f64,
    /// Weight overrides by strategy name
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

impl SearchConfig {
    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_millis(self.strategy_timeout_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strategy_timeout_ms: default_strategy_timeout_ms(),
            default_limit: default_search_limit(),
            rerank_top_n: default_rerank_top_n(),
            fusion: FusionMethod::default(),
            rrf_k: default_rrf_k(),
            vector_threshold: default_vector_threshold(),
            keyword_blend: default_keyword_blend(),
            weights: BTreeMap::new(),
        }
    }
}

fn default_strategy_timeout_ms() -> u64 {
    2000
}

fn default_search_limit() -> usize {
    10
}

fn default_rerank_top_n() -> usize {
    20
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_vector_threshold() -> f64 {
    0.0
}

fn default_keyword_blend() -> f64 {
    0.1
}

/// Search result cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Maximum cached entries
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Entry lifetime in seconds, 0 for no expiry
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_seconds > 0).then(|| Duration::from_secs(self.ttl_seconds))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            capacity: default_cache_capacity(),
            ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_cache_ttl_seconds() -> u64 {
    300
}
