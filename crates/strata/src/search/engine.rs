//! Hybrid search orchestration
//!
//! A query fans out to every selected strategy at once, each under its own
//! timeout. Failed or slow strategies contribute an empty ranking, so a
//! query only comes back empty when every path did. Rankings are fused
//! and the fused head is optionally reranked.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{InMemoryCache, SearchCache};
use crate::clock::SharedClock;
use crate::config::{Config, FusionMethod, SearchConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StrataError};
use crate::memory::types::ScoredResult;
use crate::rerank::{RerankCandidate, Reranker};
use crate::search::fusion::{ConfidenceWeightedFusion, FusionStrategy, ReciprocalRankFusion};
use crate::search::strategies::{
    FullTextStrategy, ImportanceStrategy, RecencyStrategy, SparseStrategy, VectorStrategy,
};
use crate::search::SearchStrategy;
use crate::storage::{MemoryFilter, MemoryStorage, VectorStore};

/// Parameters for one hybrid query
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub tenant_id: String,
    /// Strategies to run; `None` runs every registered one
    pub strategies: Option<Vec<String>>,
    /// Per-strategy fusion weight overrides
    pub weights: HashMap<String, f64>,
    pub filter: MemoryFilter,
    pub limit: usize,
    pub use_cache: bool,
    pub enable_reranking: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tenant_id: tenant_id.into(),
            strategies: None,
            weights: HashMap::new(),
            filter: MemoryFilter::default(),
            limit: 10,
            use_cache: true,
            enable_reranking: false,
        }
    }

    pub fn with_strategies<I, S>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strategies = Some(strategies.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_weight(mut self, strategy: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(strategy.into(), weight);
        self
    }

    pub fn with_filter(mut self, filter: MemoryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_reranking(mut self, enable: bool) -> Self {
        self.enable_reranking = enable;
        self
    }
}

pub struct HybridSearchEngine {
    strategies: BTreeMap<String, Arc<dyn SearchStrategy>>,
    fusion: Arc<dyn FusionStrategy>,
    cache: Option<SearchCache>,
    reranker: Option<Arc<dyn Reranker>>,
    storage: Option<Arc<dyn MemoryStorage>>,
    config: SearchConfig,
}

impl HybridSearchEngine {
    /// Engine with no strategies, fusing as `config` says
    pub fn new(config: SearchConfig) -> Self {
        let fusion: Arc<dyn FusionStrategy> = match config.fusion {
            FusionMethod::Rrf => Arc::new(ReciprocalRankFusion::new(config.rrf_k)),
            FusionMethod::ConfidenceWeighted => Arc::new(ConfidenceWeightedFusion),
        };
        Self {
            strategies: BTreeMap::new(),
            fusion,
            cache: None,
            reranker: None,
            storage: None,
            config,
        }
    }

    /// All five built-in strategies over one storage backend, plus an
    /// in-process result cache when `config.cache` enables it.
    pub fn with_default_strategies(
        config: &Config,
        storage: Arc<dyn MemoryStorage>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        clock: SharedClock,
    ) -> Self {
        let search = &config.search;
        let mut engine = Self::new(search.clone())
            .with_strategy(Arc::new(
                VectorStrategy::new(embedder, vectors, storage.clone())
                    .with_threshold(search.vector_threshold)
                    .with_clock(clock.clone()),
            ))
            .with_strategy(Arc::new(
                FullTextStrategy::new(storage.clone()).with_clock(clock.clone()),
            ))
            .with_strategy(Arc::new(
                SparseStrategy::new(storage.clone()).with_clock(clock.clone()),
            ))
            .with_strategy(Arc::new(
                ImportanceStrategy::new(storage.clone())
                    .with_keyword_blend(search.keyword_blend)
                    .with_clock(clock.clone()),
            ))
            .with_strategy(Arc::new(
                RecencyStrategy::new(storage.clone())
                    .with_decay(config.decay.clone())
                    .with_keyword_blend(search.keyword_blend)
                    .with_clock(clock.clone()),
            ));
        engine.storage = Some(storage);

        if config.cache.enabled {
            let provider = Arc::new(InMemoryCache::with_clock(config.cache.capacity, clock));
            engine = engine.with_cache(SearchCache::new(provider, config.cache.ttl()));
        }
        engine
    }

    /// Register a strategy under its own name, replacing any previous one
    pub fn with_strategy(mut self, strategy: Arc<dyn SearchStrategy>) -> Self {
        self.strategies.insert(strategy.name().to_string(), strategy);
        self
    }

    pub fn with_fusion(mut self, fusion: Arc<dyn FusionStrategy>) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_cache(mut self, cache: SearchCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Reranker for the fused head; `storage` supplies candidate importance
    pub fn with_reranker(
        mut self,
        reranker: Arc<dyn Reranker>,
        storage: Arc<dyn MemoryStorage>,
    ) -> Self {
        self.reranker = Some(reranker);
        self.storage = Some(storage);
        self
    }

    /// Request using the configured default limit
    pub fn request(&self, query: impl Into<String>, tenant_id: impl Into<String>) -> SearchRequest {
        SearchRequest::new(query, tenant_id).with_limit(self.config.default_limit)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    pub fn cache(&self) -> Option<&SearchCache> {
        self.cache.as_ref()
    }

    /// Drop cached rankings for a tenant after its memories change
    pub async fn invalidate_cache(&self, tenant_id: &str, strategy: Option<&str>) -> Result<usize> {
        match &self.cache {
            Some(cache) => cache.invalidate(tenant_id, strategy).await,
            None => Ok(0),
        }
    }

    /// Run a hybrid query.
    ///
    /// Only invalid weights fail the call. Strategy errors, timeouts and
    /// unknown strategy names all degrade to empty rankings.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredResult>> {
        if let Some((name, weight)) = request
            .weights
            .iter()
            .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
        {
            return Err(StrataError::Validation(format!(
                "weight for strategy '{name}' must be a finite non-negative number, got {weight}"
            )));
        }
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let selected: BTreeSet<String> = match &request.strategies {
            Some(names) => names.iter().cloned().collect(),
            None => self.strategies.keys().cloned().collect(),
        };
        let candidate_limit = if request.enable_reranking {
            request.limit.max(self.config.rerank_top_n)
        } else {
            request.limit
        };

        let rankings = self
            .collect_rankings(request, &selected, candidate_limit)
            .await;
        let weights = self.resolve_weights(&selected, &request.weights);
        let mut fused = self.fusion.fuse(&rankings, &weights);
        debug!(
            query = %request.query,
            strategies = rankings.len(),
            fused = fused.len(),
            fusion = self.fusion.name(),
            "Fused search rankings"
        );

        if request.enable_reranking && fused.len() > 1 {
            fused = self.rerank(request, fused).await;
        }

        fused.truncate(request.limit);
        Ok(fused)
    }

    /// One strategy's raw ranking, skipping fusion and the cache.
    ///
    /// Unknown names and failures yield an empty list.
    pub async fn search_single_strategy(
        &self,
        name: &str,
        query: &str,
        tenant_id: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        let Some(strategy) = self.strategies.get(name) else {
            debug!(strategy = name, "Unknown search strategy, returning no results");
            return Ok(Vec::new());
        };

        let outcome = tokio::time::timeout(
            self.config.strategy_timeout(),
            strategy.search(query, tenant_id, filter, limit),
        )
        .await;
        Ok(degrade(name, outcome).unwrap_or_default())
    }

    async fn collect_rankings(
        &self,
        request: &SearchRequest,
        selected: &BTreeSet<String>,
        limit: usize,
    ) -> BTreeMap<String, Vec<ScoredResult>> {
        let cache_query = format!(
            "{}|{}|{}",
            request.query,
            request.filter.cache_fingerprint(),
            limit
        );
        let cache = self.cache.as_ref().filter(|_| request.use_cache);

        let mut rankings = BTreeMap::new();
        let mut join_set = JoinSet::new();
        let mut task_names = HashMap::new();
        for name in selected {
            let Some(strategy) = self.strategies.get(name) else {
                debug!(strategy = %name, "Unknown search strategy, returning no results");
                rankings.insert(name.clone(), Vec::new());
                continue;
            };

            if let Some(cache) = cache {
                if let Some(hit) = cache.get(&cache_query, &request.tenant_id, name).await {
                    rankings.insert(name.clone(), hit);
                    continue;
                }
            }

            let strategy = Arc::clone(strategy);
            let name = name.clone();
            let query = request.query.clone();
            let tenant_id = request.tenant_id.clone();
            let filter = request.filter.clone();
            let timeout = self.config.strategy_timeout();
            let task_name = name.clone();
            let handle = join_set.spawn(async move {
                let outcome =
                    tokio::time::timeout(timeout, strategy.search(&query, &tenant_id, &filter, limit))
                        .await;
                (name, outcome)
            });
            task_names.insert(handle.id(), task_name);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            let (name, outcome) = match joined {
                Ok((_, done)) => done,
                Err(e) => {
                    // panicked or cancelled; still owes an empty ranking
                    match task_names.remove(&e.id()) {
                        Some(name) => {
                            warn!(strategy = %name, error = %e, "Search strategy task failed to join");
                            rankings.insert(name, Vec::new());
                        }
                        None => warn!(error = %e, "Search strategy task failed to join"),
                    }
                    continue;
                }
            };

            let Some(results) = degrade(&name, outcome) else {
                rankings.insert(name, Vec::new());
                continue;
            };
            if let Some(cache) = cache {
                if let Err(e) = cache
                    .set(&cache_query, &request.tenant_id, &name, &results)
                    .await
                {
                    warn!(strategy = %name, error = %e, "Failed to cache search results");
                }
            }
            rankings.insert(name, results);
        }

        rankings
    }

    /// Request override, then configured weight, then the strategy's own
    fn resolve_weights(
        &self,
        selected: &BTreeSet<String>,
        overrides: &HashMap<String, f64>,
    ) -> HashMap<String, f64> {
        selected
            .iter()
            .map(|name| {
                let weight = overrides
                    .get(name)
                    .or_else(|| self.config.weights.get(name))
                    .copied()
                    .or_else(|| self.strategies.get(name).map(|s| s.default_weight()))
                    .unwrap_or(1.0);
                (name.clone(), weight)
            })
            .collect()
    }

    /// Rerank the fused head; the tail keeps its fused order behind it.
    ///
    /// Reranker scores live on their own scale, so tail scores are shifted
    /// down until the best of them ties the lowest reranked score. Scores
    /// stay non-increasing down the whole list.
    async fn rerank(&self, request: &SearchRequest, mut fused: Vec<ScoredResult>) -> Vec<ScoredResult> {
        let Some(reranker) = &self.reranker else {
            return fused;
        };

        let head_len = fused.len().min(self.config.rerank_top_n);
        let tail = fused.split_off(head_len);

        let mut candidates = Vec::with_capacity(head_len);
        for result in &fused {
            let importance = match &self.storage {
                Some(storage) => match storage.get(result.memory_id, &request.tenant_id).await {
                    Ok(item) => item.map_or(0.0, |item| item.importance),
                    Err(e) => {
                        debug!(memory_id = %result.memory_id, error = %e, "Importance lookup failed");
                        0.0
                    }
                },
                None => 0.0,
            };
            candidates.push(RerankCandidate::new(result.memory_id, result.score, importance));
        }

        match reranker
            .rerank(&request.query, candidates, &request.tenant_id, head_len)
            .await
        {
            Ok(reranked) => {
                debug!(reranker = reranker.name(), reranked = reranked.len(), "Reranked results");
                let mut head: Vec<ScoredResult> = reranked
                    .into_iter()
                    .map(|c| ScoredResult::new(c.memory_id, c.score))
                    .collect();
                let tail = seat_below(&head, tail);
                head.extend(tail);
                head
            }
            Err(e) => {
                warn!(reranker = reranker.name(), error = %e, "Reranking failed, keeping fused order");
                fused.extend(tail);
                fused
            }
        }
    }
}

/// Shift `tail` so its best score does not exceed the worst of `head`
fn seat_below(head: &[ScoredResult], mut tail: Vec<ScoredResult>) -> Vec<ScoredResult> {
    let floor = head.iter().map(|r| r.score).fold(f64::INFINITY, f64::min);
    let ceiling = tail.iter().map(|r| r.score).fold(f64::NEG_INFINITY, f64::max);
    if floor.is_finite() && ceiling > floor {
        let shift = ceiling - floor;
        for result in &mut tail {
            result.score -= shift;
        }
    }
    tail
}

/// Turn a strategy outcome into its results, logging and dropping failures
fn degrade(
    name: &str,
    outcome: std::result::Result<Result<Vec<ScoredResult>>, tokio::time::error::Elapsed>,
) -> Option<Vec<ScoredResult>> {
    match outcome {
        Ok(Ok(results)) => Some(results),
        Ok(Err(e)) => {
            warn!(
                strategy = name,
                error = %e,
                degradable = e.is_degradable(),
                "Search strategy failed, treating as empty"
            );
            None
        }
        Err(_) => {
            warn!(strategy = name, "Search strategy timed out, treating as empty");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rerank::RuleBasedReranker;
    use crate::testing::{
        FailingReranker, FailingStrategy, FlatReranker, PanickingStrategy, SlowStrategy,
        StaticStrategy,
    };
    use std::time::Duration;
    use uuid::Uuid;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn create_test_engine() -> HybridSearchEngine {
        crate::telemetry::init_test_logging();
        let config = SearchConfig {
            strategy_timeout_ms: 50,
            ..SearchConfig::default()
        };
        HybridSearchEngine::new(config)
            .with_strategy(Arc::new(StaticStrategy::new(
                "alpha",
                vec![(id(1), 0.9), (id(2), 0.5)],
            )))
            .with_strategy(Arc::new(StaticStrategy::new(
                "beta",
                vec![(id(2), 0.8), (id(3), 0.1)],
            )))
    }

    #[tokio::test]
    async fn test_fuses_all_registered_strategies() {
        let engine = create_test_engine();
        let results = engine.search(&SearchRequest::new("q", "t")).await.unwrap();
        assert_eq!(results[0].memory_id, id(2));
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_empty() {
        let engine = create_test_engine();
        let results = engine
            .search(&SearchRequest::new("q", "t").with_strategies(["alpha", "disabled"]))
            .await
            .unwrap();
        assert_eq!(results[0].memory_id, id(1));
        assert_eq!(results.len(), 2);

        assert!(
            engine
                .search_single_strategy("disabled", "q", "t", &MemoryFilter::new(), 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_failing_and_slow_strategies_degrade() {
        let engine = create_test_engine()
            .with_strategy(Arc::new(FailingStrategy::new("broken")))
            .with_strategy(Arc::new(SlowStrategy::new(
                "slow",
                Duration::from_secs(5),
                vec![(id(9), 1.0)],
            )));
        let results = engine.search(&SearchRequest::new("q", "t")).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.memory_id != id(9)));
    }

    #[tokio::test]
    async fn test_panicking_strategy_yields_empty_ranking() {
        let engine = create_test_engine().with_strategy(Arc::new(PanickingStrategy::new("buggy")));
        let request = SearchRequest::new("q", "t");
        let selected: BTreeSet<String> =
            ["alpha", "beta", "buggy"].iter().map(|s| s.to_string()).collect();

        let rankings = engine.collect_rankings(&request, &selected, 10).await;
        assert_eq!(rankings.len(), 3);
        assert_eq!(rankings.get("buggy"), Some(&Vec::new()));
        assert_eq!(rankings["alpha"].len(), 2);

        let results = engine.search(&request).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].memory_id, id(2));
    }

    #[tokio::test]
    async fn test_weight_override_changes_order() {
        let engine = create_test_engine();
        let request = SearchRequest::new("q", "t")
            .with_strategies(["alpha", "beta"])
            .with_weight("alpha", 5.0)
            .with_weight("beta", 0.0);
        let results = engine.search(&request).await.unwrap();
        assert_eq!(results[0].memory_id, id(1));

        let bad = SearchRequest::new("q", "t").with_weight("alpha", -1.0);
        assert!(matches!(engine.search(&bad).await, Err(StrataError::Validation(_))));
    }

    #[tokio::test]
    async fn test_single_strategy_returns_raw_scores() {
        let engine = create_test_engine();
        let results = engine
            .search_single_strategy("beta", "q", "t", &MemoryFilter::new(), 10)
            .await
            .unwrap();
        assert_eq!(
            results,
            vec![ScoredResult::new(id(2), 0.8), ScoredResult::new(id(3), 0.1)]
        );
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_queries() {
        let alpha = Arc::new(StaticStrategy::new("alpha", vec![(id(1), 0.9)]));
        let engine = HybridSearchEngine::new(SearchConfig::default())
            .with_strategy(alpha.clone())
            .with_cache(SearchCache::new(Arc::new(InMemoryCache::new(16)), None));

        let request = SearchRequest::new("q", "t");
        let first = engine.search(&request).await.unwrap();
        let second = engine.search(&request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(alpha.calls(), 1);

        engine
            .search(&request.clone().with_cache(false))
            .await
            .unwrap();
        assert_eq!(alpha.calls(), 2);

        let filtered = request
            .clone()
            .with_filter(MemoryFilter::new().with_agent("other"));
        engine.search(&filtered).await.unwrap();
        assert_eq!(alpha.calls(), 3);

        assert_eq!(engine.invalidate_cache("t", None).await.unwrap(), 2);
        engine.search(&request).await.unwrap();
        assert_eq!(alpha.calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_results_are_not_cached() {
        let engine = HybridSearchEngine::new(SearchConfig::default())
            .with_strategy(Arc::new(FailingStrategy::new("broken")))
            .with_cache(SearchCache::new(Arc::new(InMemoryCache::new(16)), None));
        engine.search(&SearchRequest::new("q", "t")).await.unwrap();
        assert!(engine.cache().unwrap().get("q", "t", "broken").await.is_none());
        assert_eq!(engine.invalidate_cache("t", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reranker_failure_keeps_fused_order() {
        let storage = Arc::new(crate::storage::InMemoryStorage::new());
        let plain = create_test_engine();
        let expected = plain.search(&SearchRequest::new("q", "t")).await.unwrap();

        let engine = create_test_engine().with_reranker(Arc::new(FailingReranker), storage.clone());
        let results = engine
            .search(&SearchRequest::new("q", "t").with_reranking(true))
            .await
            .unwrap();
        assert_eq!(results, expected);

        let engine =
            create_test_engine().with_reranker(Arc::new(RuleBasedReranker::default()), storage);
        let results = engine
            .search(&SearchRequest::new("q", "t").with_reranking(true).with_limit(2))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory_id, id(2));
    }

    #[tokio::test]
    async fn test_reranked_scores_stay_monotone() {
        let config = SearchConfig {
            rerank_top_n: 1,
            ..SearchConfig::default()
        };
        let storage = Arc::new(crate::storage::InMemoryStorage::new());
        let engine = HybridSearchEngine::new(config)
            .with_strategy(Arc::new(StaticStrategy::new(
                "alpha",
                vec![(id(1), 0.9), (id(2), 0.5), (id(3), 0.2)],
            )))
            .with_reranker(Arc::new(FlatReranker { score: 0.001 }), storage);

        let results = engine
            .search(&SearchRequest::new("q", "t").with_reranking(true))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ScoredResult::new(id(1), 0.001));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(
            results.iter().map(|r| r.memory_id).collect::<Vec<_>>(),
            vec![id(1), id(2), id(3)]
        );
    }

    #[tokio::test]
    async fn test_zero_limit() {
        let engine = create_test_engine();
        assert_eq!(engine.request("q", "t").limit, 10);
        assert!(
            engine
                .search(&SearchRequest::new("q", "t").with_limit(0))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
