//! LRU-bounded in-process cache
//!
//! Entries carry an optional expiry checked lazily against the injected
//! clock. When full, the least recently used entry is dropped.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::Mutex;

use crate::cache::{CacheProvider, CacheScope, glob_to_regex};
use crate::clock::{SharedClock, system_clock};
use crate::error::{Result, StrataError};

/// Default number of entries held
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`CacheProvider`]
pub struct InMemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    clock: SharedClock,
}

impl InMemoryCache {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// A zero capacity falls back to [`DEFAULT_CACHE_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, system_clock())
    }

    pub fn with_clock(capacity: usize, clock: SharedClock) -> Self {
        let cap = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            clock,
        }
    }

    /// Number of entries, including ones that have expired but not been read
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn capacity(&self) -> usize {
        self.entries.lock().await.cap().get()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[async_trait]
impl CacheProvider for InMemoryCache {
    async fn get(&self, key: &str, scope: &CacheScope) -> Result<Option<String>> {
        let full_key = scope.full_key(key);
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;

        let live = entries
            .get(&full_key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        match live {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                entries.pop(&full_key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
        scope: &CacheScope,
    ) -> Result<()> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| StrataError::Config(format!("invalid cache ttl: {e}")))?;
                Some(self.clock.now() + ttl)
            }
            None => None,
        };

        self.entries
            .lock()
            .await
            .put(scope.full_key(key), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str, scope: &CacheScope) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .await
            .pop(&scope.full_key(key))
            .is_some())
    }

    async fn exists(&self, key: &str, scope: &CacheScope) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .lock()
            .await
            .peek(&scope.full_key(key))
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn clear(&self, pattern: Option<&str>, scope: &CacheScope) -> Result<usize> {
        let matcher = glob_to_regex(&scope.full_key(pattern.unwrap_or("*")))?;
        let mut entries = self.entries.lock().await;

        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        Ok(doomed.len())
    }
}
