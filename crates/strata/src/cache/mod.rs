//! Cache contracts
//!
//! A [`CacheProvider`] stores opaque string values under scoped keys.
//! [`SearchCache`] layers per-strategy result memoization on top.

pub mod memory;
pub mod search;

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{Result, StrataError};

pub use memory::InMemoryCache;
pub use search::SearchCache;

/// Optional key prefixes isolating agents and sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheScope {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

impl CacheScope {
    /// Unscoped keys
    pub fn global() -> Self {
        Self::default()
    }

    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// `agent:session:key`, omitting unset parts
    pub fn full_key(&self, key: &str) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(agent_id) = &self.agent_id {
            parts.push(agent_id);
        }
        if let Some(session_id) = &self.session_id {
            parts.push(session_id);
        }
        parts.push(key);
        parts.join(":")
    }
}

/// Key/value cache with optional per-entry TTL
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn get(&self, key: &str, scope: &CacheScope) -> Result<Option<String>>;

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
        scope: &CacheScope,
    ) -> Result<()>;

    /// Returns false if the key was absent
    async fn delete(&self, key: &str, scope: &CacheScope) -> Result<bool>;

    async fn exists(&self, key: &str, scope: &CacheScope) -> Result<bool>;

    /// Remove keys matching a glob `pattern` (`*` and `?`) within `scope`,
    /// or every key in scope when `pattern` is `None`. Returns the count.
    async fn clear(&self, pattern: Option<&str>, scope: &CacheScope) -> Result<usize>;
}

/// Compile a glob with `*` and `?` wildcards into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| StrataError::Config(format!("invalid cache pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key_prefixes() {
        assert_eq!(CacheScope::global().full_key("k"), "k");
        assert_eq!(CacheScope::for_agent("a").full_key("k"), "a:k");
        assert_eq!(
            CacheScope::for_agent("a").with_session("s").full_key("k"),
            "a:s:k"
        );
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("search:vector:*").unwrap();
        assert!(re.is_match("search:vector:t1:abc"));
        assert!(!re.is_match("search:fulltext:t1:abc"));
        assert!(!re.is_match("xsearch:vector:t1"));

        let re = glob_to_regex("a?c.d").unwrap();
        assert!(re.is_match("abc.d"));
        assert!(!re.is_match("abcxd"));
    }
}
