use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::{SharedClock, system_clock};
use crate::config::LayerDecayConfig;
use crate::error::Result;
use crate::memory::decay::recency_score;
use crate::memory::types::ScoredResult;
use crate::search::strategies::candidates;
use crate::search::{
    SearchStrategy, finish_ranking, is_wildcard, keyword_overlap, tokenize, wildcard_results,
};
use crate::storage::{MemoryFilter, MemoryStorage};

/// Ranks by how recently each memory was used, decaying at its layer's
/// rate, with keyword overlap mixed in.
pub struct RecencyStrategy {
    storage: Arc<dyn MemoryStorage>,
    decay: LayerDecayConfig,
    keyword_blend: f64,
    clock: SharedClock,
}

impl RecencyStrategy {
    pub fn new(storage: Arc<dyn MemoryStorage>) -> Self {
        Self {
            storage,
            decay: LayerDecayConfig::default(),
            keyword_blend: 0.1,
            clock: system_clock(),
        }
    }

    pub fn with_decay(mut self, decay: LayerDecayConfig) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_keyword_blend(mut self, blend: f64) -> Self {
        self.keyword_blend = blend.clamp(0.0, 1.0);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl SearchStrategy for RecencyStrategy {
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredResult>> {
        let now = self.clock.now();
        if is_wildcard(query) {
            return wildcard_results(self.storage.as_ref(), tenant_id, filter, now, limit).await;
        }

        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        let results = candidates(self.storage.as_ref(), tenant_id, filter, now)
            .await?
            .iter()
            .map(|item| {
                let recency = recency_score(
                    item.last_accessed_at,
                    item.created_at,
                    item.usage_count,
                    now,
                    self.decay.for_layer(item.layer),
                );
                let score = (1.0 - self.keyword_blend) * recency.score
                    + self.keyword_blend * keyword_overlap(&terms, item);
                ScoredResult::new(item.id, score)
            })
            .collect();
        Ok(finish_ranking(results, limit))
    }

    fn name(&self) -> &'static str {
        "recency"
    }

    fn default_weight(&self) -> f64 {
        0.5
    }
}
