//! Per-strategy search result memoization
//!
//! Keys look like `search:{strategy}:{tenant}:{query digest}` and values
//! are JSON arrays of `{"id": ..., "score": ...}`. Anything that does not
//! decode cleanly is reported as a miss so the strategy simply runs again.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheProvider, CacheScope};
use crate::error::{Result, StrataError};
use crate::math::stable_hash;
use crate::memory::types::ScoredResult;

const KEY_PREFIX: &str = "search";

/// Memoizes ranked lists per `(query, tenant, strategy)`
#[derive(Clone)]
pub struct SearchCache {
    provider: Arc<dyn CacheProvider>,
    ttl: Option<Duration>,
    scope: CacheScope,
}

impl SearchCache {
    pub fn new(provider: Arc<dyn CacheProvider>, ttl: Option<Duration>) -> Self {
        Self {
            provider,
            ttl,
            scope: CacheScope::global(),
        }
    }

    /// Cache key for a query; the query text is hashed so arbitrary input
    /// cannot collide with the `:`-separated prefix.
    pub fn cache_key(query: &str, tenant_id: &str, strategy: &str) -> String {
        format!(
            "{KEY_PREFIX}:{strategy}:{tenant_id}:{:016x}",
            stable_hash(query) as u64
        )
    }

    /// Cached ranking, or `None` on a miss, a corrupted entry, or a
    /// provider failure.
    pub async fn get(
        &self,
        query: &str,
        tenant_id: &str,
        strategy: &str,
    ) -> Option<Vec<ScoredResult>> {
        let key = Self::cache_key(query, tenant_id, strategy);
        let payload = match self.provider.get(&key, &self.scope).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                warn!(strategy, error = %e, "Search cache read failed, treating as miss");
                return None;
            }
        };

        match decode_results(&payload) {
            Ok(results) => {
                debug!(strategy, hits = results.len(), "Search cache hit");
                Some(results)
            }
            Err(e) => {
                warn!(strategy, error = %e, "Discarding corrupted search cache entry");
                None
            }
        }
    }

    pub async fn set(
        &self,
        query: &str,
        tenant_id: &str,
        strategy: &str,
        results: &[ScoredResult],
    ) -> Result<()> {
        let key = Self::cache_key(query, tenant_id, strategy);
        let payload = serde_json::to_string(results)?;
        self.provider.set(&key, payload, self.ttl, &self.scope).await
    }

    /// Drop cached rankings for a tenant, for one strategy or all of them
    pub async fn invalidate(&self, tenant_id: &str, strategy: Option<&str>) -> Result<usize> {
        let pattern = format!("{KEY_PREFIX}:{}:{tenant_id}:*", strategy.unwrap_or("*"));
        let cleared = self.provider.clear(Some(&pattern), &self.scope).await?;
        debug!(tenant_id, ?strategy, cleared, "Invalidated search cache");
        Ok(cleared)
    }
}

/// Strictly decode a cached payload
pub fn decode_results(payload: &str) -> Result<Vec<ScoredResult>> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| StrataError::CacheCorruption(format!("invalid JSON: {e}")))?;

    let Value::Array(entries) = value else {
        return Err(StrataError::CacheCorruption(
            "payload is not a list".to_string(),
        ));
    };

    entries
        .iter()
        .map(|entry| {
            let id = entry
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| StrataError::CacheCorruption("entry missing id".to_string()))?;
            let memory_id = Uuid::parse_str(id)
                .map_err(|_| StrataError::CacheCorruption(format!("invalid id '{id}'")))?;
            let score = entry
                .get("score")
                .and_then(Value::as_f64)
                .ok_or_else(|| StrataError::CacheCorruption("entry missing score".to_string()))?;
            Ok(ScoredResult::new(memory_id, score))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    fn create_test_cache() -> (SearchCache, Arc<InMemoryCache>) {
        let provider = Arc::new(InMemoryCache::new(64));
        (SearchCache::new(provider.clone(), None), provider)
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order() {
        let (cache, _) = create_test_cache();
        let results = vec![
            ScoredResult::new(Uuid::from_u128(2), 0.9),
            ScoredResult::new(Uuid::from_u128(1), 0.4),
        ];
        cache.set("rust", "t1", "vector", &results).await.unwrap();
        assert_eq!(cache.get("rust", "t1", "vector").await, Some(results));
        assert_eq!(cache.get("rust", "t2", "vector").await, None);
        assert_eq!(cache.get("rust", "t1", "fulltext").await, None);
    }

    #[tokio::test]
    async fn test_invalid_uuid_is_a_miss() {
        let (cache, provider) = create_test_cache();
        let key = SearchCache::cache_key("q", "t1", "vector");
        provider
            .set(
                &key,
                r#"[{"id": "not-a-uuid", "score": 0.9}]"#.to_string(),
                None,
                &CacheScope::global(),
            )
            .await
            .unwrap();
        assert_eq!(cache.get("q", "t1", "vector").await, None);
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        for payload in [
            "not json",
            r#"{"id": "x"}"#,
            r#"[{"score": 0.5}]"#,
            r#"[{"id": 5, "score": 0.5}]"#,
            r#"[{"id": "00000000-0000-0000-0000-000000000001"}]"#,
        ] {
            assert!(
                matches!(decode_results(payload), Err(StrataError::CacheCorruption(_))),
                "accepted {payload}"
            );
        }
        assert_eq!(decode_results("[]").unwrap(), vec![]);
    }

    #[tokio::test]
    async fn test_invalidate_by_strategy_and_tenant() {
        let (cache, _) = create_test_cache();
        let r = vec![ScoredResult::new(Uuid::from_u128(1), 1.0)];
        cache.set("q", "t1", "vector", &r).await.unwrap();
        cache.set("q", "t1", "fulltext", &r).await.unwrap();
        cache.set("q", "t2", "vector", &r).await.unwrap();

        assert_eq!(cache.invalidate("t1", Some("vector")).await.unwrap(), 1);
        assert!(cache.get("q", "t1", "fulltext").await.is_some());
        assert!(cache.get("q", "t2", "vector").await.is_some());

        assert_eq!(cache.invalidate("t1", None).await.unwrap(), 1);
        assert!(cache.get("q", "t1", "fulltext").await.is_none());
        assert!(cache.get("q", "t2", "vector").await.is_some());
    }
}
