//! BM25 over the listed corpus

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::{SharedClock, system_clock};
use crate::error::Result;
use crate::memory::types::ScoredResult;
use crate::search::strategies::candidates;
use crate::search::{SearchStrategy, finish_ranking, is_wildcard, tokenize, wildcard_results};
use crate::storage::{MemoryFilter, MemoryStorage};

/// Term frequency saturation
pub const DEFAULT_K1: f64 = 1.5;
/// Document length normalization
pub const DEFAULT_B: f64 = 0.75;

pub struct SparseStrategy {
    storage: Arc<dyn MemoryStorage>,
    k1: f64,
    b: f64,
    clock: SharedClock,
}

impl SparseStrategy {
    pub fn new(storage: Arc<dyn MemoryStorage>) -> Self {
        Self {
            storage,
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            clock: system_clock(),
        }
    }

    pub fn with_params(mut self, k1: f64, b: f64) -> Self {
        self.k1 = k1;
        self.b = b;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

/// Term counts of one document
struct Document {
    terms: HashMap<String, usize>,
    len: usize,
}

impl Document {
    fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        let len = tokens.len();
        let mut terms = HashMap::new();
        for token in tokens {
            *terms.entry(token).or_insert(0) += 1;
        }
        Self { terms, len }
    }
}

/// BM25 scores for `documents` against the distinct `query_terms`
pub fn bm25_scores(query_terms: &BTreeSet<String>, documents: &[&str], k1: f64, b: f64) -> Vec<f64> {
    let docs: Vec<Document> = documents.iter().map(|text| Document::new(text)).collect();
    if docs.is_empty() {
        return Vec::new();
    }

    let n = docs.len() as f64;
    let avg_len = (docs.iter().map(|d| d.len).sum::<usize>() as f64 / n).max(1.0);
    let idf: Vec<(String, f64)> = query_terms
        .iter()
        .map(|term| {
            let df = docs.iter().filter(|d| d.terms.contains_key(term)).count() as f64;
            (term.clone(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
        })
        .collect();

    docs.iter()
        .map(|doc| {
            let norm = k1 * (1.0 - b + b * doc.len as f64 / avg_len);
            idf.iter()
                .map(|(term, idf)| {
                    let tf = doc.terms.get(term).copied().unwrap_or(0) as f64;
                    if tf == 0.0 {
                        0.0
                    } else {
                        idf * tf * (k1 + 1.0) / (tf + norm)
                    }
                })
                .sum()
        })
        .collect()
}

#[async_trait]
impl SearchStrategy for SparseStrategy {
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

        let items = candidates(self.storage.as_ref(), tenant_id, filter, now).await?;
        let texts: Vec<&str> = items.iter().map(|item| item.content.as_str()).collect();
        let scores = bm25_scores(&terms, &texts, self.k1, self.b);

        let results = items
            .iter()
            .zip(scores)
            .map(|(item, score)| ScoredResult::new(item.id, score))
            .collect();
        Ok(finish_ranking(results, limit))
    }

    fn name(&self) -> &'static str {
        "sparse"
    }

    fn default_weight(&self) -> f64 {
        0.8
    }
}
