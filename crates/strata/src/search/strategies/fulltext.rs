//! Phrase, tag and word-overlap matching

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::{SharedClock, system_clock};
use crate::error::Result;
use crate::memory::types::{MemoryItem, ScoredResult};
use crate::search::strategies::candidates;
use crate::search::{SearchStrategy, finish_ranking, is_wildcard, tokenize, wildcard_results};
use crate::storage::{MemoryFilter, MemoryStorage};

const PHRASE_SCORE: f64 = 1.0;
const TAG_BASE_SCORE: f64 = 0.8;
const TAG_COVERAGE_BONUS: f64 = 0.1;
const OVERLAP_WEIGHT: f64 = 0.7;

/// Scores, best match wins:
/// - the whole query appears in the content: 1.0
/// - a query word is one of the item's tags: 0.8, plus up to 0.1 for the
///   share of query words that are tags
/// - otherwise 0.7 times the share of query words found in the content
///
/// Items scoring zero are dropped.
pub struct FullTextStrategy {
    storage: Arc<dyn MemoryStorage>,
    clock: SharedClock,
}

impl FullTextStrategy {
    pub fn new(storage: Arc<dyn MemoryStorage>) -> Self {
        Self {
            storage,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

fn score_item(phrase: &str, terms: &BTreeSet<String>, item: &MemoryItem) -> f64 {
    let content = item.content.to_lowercase();
    if content.contains(phrase) {
        return PHRASE_SCORE;
    }

    let tag_hits = terms.iter().filter(|term| item.has_tag(term)).count();
    if tag_hits > 0 {
        return TAG_BASE_SCORE + TAG_COVERAGE_BONUS * tag_hits as f64 / terms.len() as f64;
    }

    let words: BTreeSet<String> = tokenize(&content).into_iter().collect();
    let overlap = terms.iter().filter(|term| words.contains(*term)).count();
    OVERLAP_WEIGHT * overlap as f64 / terms.len() as f64
}

#[async_trait]
impl SearchStrategy for FullTextStrategy {
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
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let phrase = terms_phrase(query);

        let results = candidates(self.storage.as_ref(), tenant_id, filter, now)
            .await?
            .iter()
            .map(|item| ScoredResult::new(item.id, score_item(&phrase, &terms, item)))
            .collect();
        Ok(finish_ranking(results, limit))
    }

    fn name(&self) -> &'static str {
        "fulltext"
    }
}

/// Lower-cased query with whitespace runs collapsed
fn terms_phrase(query: &str) -> String {
    tokenize(query).join(" ")
}
