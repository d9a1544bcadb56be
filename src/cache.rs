//! Retrieval result caching keyed by query, plan and store generation

use crate::config::CacheConfig;
use crate::types::RetrievedContext;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Compute a deterministic hash for the query text
pub fn query_hash(query: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    query.trim().to_lowercase().hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    query_hash: u64,
    plan_hash: u64,
    /// Store generation at insert time; a bump invalidates the entry
    generation: u64,
}

struct CacheEntry {
    context: RetrievedContext,
    created_at: DateTime<Utc>,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// In-process memoization of fused retrieval results with a TTL.
///
/// Any ingest or delete bumps the store generation, which changes the key
/// and makes stale entries unreachable; they are swept on insert.
pub struct RetrievalCache {
    config: CacheConfig,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RetrievalCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a cached result if present, unexpired and from the current generation
    pub async fn get(
        &self,
        query_hash: u64,
        plan_hash: u64,
        generation: u64,
    ) -> Option<RetrievedContext> {
        if !self.config.enabled {
            return None;
        }

        let key = CacheKey {
            query_hash,
            plan_hash,
            generation,
        };
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(&key) {
            let age = Utc::now().signed_duration_since(entry.created_at);
            if age <= Duration::seconds(self.config.ttl_seconds) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("retrieval cache hit (generation {})", generation);
                return Some(entry.context.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a result, sweeping expired and superseded-generation entries
    pub async fn insert(
        &self,
        query_hash: u64,
        plan_hash: u64,
        generation: u64,
        context: RetrievedContext,
    ) {
        if !self.config.enabled {
            return;
        }

        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let ttl = Duration::seconds(self.config.ttl_seconds);
        entries.retain(|key, entry| {
            key.generation == generation && now.signed_duration_since(entry.created_at) <= ttl
        });

        // Evict the oldest entry when at capacity
        if entries.len() >= self.config.max_entries {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| *k)
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            CacheKey {
                query_hash,
                plan_hash,
                generation,
            },
            CacheEntry {
                context,
                created_at: now,
            },
        );
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RetrievedContext {
        RetrievedContext::empty(0.8)
    }

    #[tokio::test]
    async fn test_cache_hit_and_miss() {
        let cache = RetrievalCache::new(CacheConfig::default());
        let q = query_hash("where is acme located?");

        assert!(cache.get(q, 1, 0).await.is_none());
        cache.insert(q, 1, 0, context()).await;
        assert!(cache.get(q, 1, 0).await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_generation_bump_invalidates() {
        let cache = RetrievalCache::new(CacheConfig::default());
        let q = query_hash("query");
        cache.insert(q, 1, 0, context()).await;

        assert!(cache.get(q, 1, 1).await.is_none());

        // A later insert sweeps entries from superseded generations
        cache.insert(q, 2, 1, context()).await;
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = RetrievalCache::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        let q = query_hash("query");
        cache.insert(q, 1, 0, context()).await;
        assert!(cache.get(q, 1, 0).await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_eviction() {
        let cache = RetrievalCache::new(CacheConfig {
            enabled: true,
            max_entries: 2,
            ttl_seconds: 60,
        });
        for i in 0..3u64 {
            cache.insert(i, 0, 0, context()).await;
        }
        assert!(cache.stats().await.entries <= 2);
    }

    #[test]
    fn test_query_hash_normalizes() {
        assert_eq!(query_hash("  Hello World "), query_hash("hello world"));
    }
}
