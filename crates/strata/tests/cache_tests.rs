//! Integration tests for search result caching
//!
//! Covers:
//! - Corrupted entries being treated as misses
//! - TTL expiry on the injected clock
//! - Tenant-scoped invalidation
//! - The engine serving stale rankings until invalidated

use std::sync::Arc;
use std::time::Duration;

use strata::Config;
use strata::cache::{CacheProvider, CacheScope, InMemoryCache, SearchCache};
use strata::clock::{Clock, ManualClock};
use strata::embedding::HashingEmbedder;
use strata::memory::{MemoryItem, MemoryLayer, ScoredResult};
use strata::search::{HybridSearchEngine, SearchRequest};
use strata::storage::{InMemoryStorage, MemoryStorage, VectorStore};
use uuid::Uuid;

fn create_test_cache(ttl: Option<Duration>) -> (SearchCache, Arc<InMemoryCache>, ManualClock) {
    strata::telemetry::init_test_logging();
    let clock = ManualClock::default();
    let provider = Arc::new(InMemoryCache::with_clock(64, Arc::new(clock.clone())));
    (SearchCache::new(provider.clone(), ttl), provider, clock)
}

fn sample_results() -> Vec<ScoredResult> {
    vec![
        ScoredResult::new(Uuid::from_u128(1), 0.9),
        ScoredResult::new(Uuid::from_u128(2), 0.4),
    ]
}

mod corruption_tests {
    use super::*;

    async fn assert_payload_is_miss(payload: &str) {
        let (cache, provider, _) = create_test_cache(None);
        let key = SearchCache::cache_key("q", "t", "vector");
        provider
            .set(&key, payload.to_string(), None, &CacheScope::global())
            .await
            .unwrap();
        assert!(cache.get("q", "t", "vector").await.is_none(), "{payload}");
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_misses() {
        for payload in [
            r#"[{"id": "not-a-uuid", "score": 0.5}]"#,
            r#"[{"id": "00000000-0000-0000-0000-000000000001"}]"#,
            r#"{"id": "00000000-0000-0000-0000-000000000001", "score": 1.0}"#,
            "not json at all",
        ] {
            assert_payload_is_miss(payload).await;
        }
    }

    #[tokio::test]
    async fn test_valid_payload_round_trips() {
        let (cache, _, _) = create_test_cache(None);
        cache.set("q", "t", "vector", &sample_results()).await.unwrap();
        assert_eq!(cache.get("q", "t", "vector").await, Some(sample_results()));
    }
}

mod expiry_tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let (cache, _, clock) = create_test_cache(Some(Duration::from_secs(30)));
        cache.set("q", "t", "sparse", &sample_results()).await.unwrap();

        clock.advance(chrono::Duration::seconds(29));
        assert!(cache.get("q", "t", "sparse").await.is_some());
        clock.advance(chrono::Duration::seconds(2));
        assert!(cache.get("q", "t", "sparse").await.is_none());
    }
}

mod invalidation_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalidation_is_tenant_scoped() {
        let (cache, _, _) = create_test_cache(None);
        for tenant in ["acme", "globex"] {
            for strategy in ["vector", "fulltext"] {
                cache.set("q", tenant, strategy, &sample_results()).await.unwrap();
            }
        }

        assert_eq!(cache.invalidate("acme", Some("vector")).await.unwrap(), 1);
        assert!(cache.get("q", "acme", "vector").await.is_none());
        assert!(cache.get("q", "acme", "fulltext").await.is_some());

        assert_eq!(cache.invalidate("acme", None).await.unwrap(), 1);
        assert!(cache.get("q", "globex", "vector").await.is_some());
        assert!(cache.get("q", "globex", "fulltext").await.is_some());
    }

    #[tokio::test]
    async fn test_engine_serves_cache_until_invalidated() {
        strata::telemetry::init_test_logging();
        let clock = ManualClock::default();
        let storage = Arc::new(InMemoryStorage::with_clock(Arc::new(clock.clone())));
        let first = MemoryItem::new("t", "a", "release checklist", MemoryLayer::Semantic, 0.6, clock.now())
            .unwrap();
        storage.store(first).await.unwrap();

        let memory: Arc<dyn MemoryStorage> = storage.clone();
        let vectors: Arc<dyn VectorStore> = storage.clone();
        let engine = HybridSearchEngine::with_default_strategies(
            &Config::default(),
            memory,
            vectors,
            Arc::new(HashingEmbedder::default()),
            Arc::new(clock.clone()),
        );
        let request = SearchRequest::new("release", "t").with_strategies(["fulltext"]);
        assert_eq!(engine.search(&request).await.unwrap().len(), 1);

        let second = MemoryItem::new("t", "a", "release notes draft", MemoryLayer::Semantic, 0.6, clock.now())
            .unwrap();
        storage.store(second).await.unwrap();
        assert_eq!(engine.search(&request).await.unwrap().len(), 1);

        assert_eq!(engine.invalidate_cache("t", Some("fulltext")).await.unwrap(), 1);
        assert_eq!(engine.search(&request).await.unwrap().len(), 2);
    }
}
