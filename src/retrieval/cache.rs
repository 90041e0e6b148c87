//! Time-to-live cache for fused search results.
//!
//! Bounded moka cache: entries expire `ttl` after insertion and the least
//! useful ones are evicted once `max_entries` is reached.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use super::RetrievedChunk;

type CacheKey = (String, usize);

/// Results keyed by `(query, k)`. Shared across runs.
pub struct RetrievalCache {
    cache: Cache<CacheKey, Arc<Vec<RetrievedChunk>>>,
}

impl RetrievalCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub async fn get(&self, query: &str, k: usize) -> Option<Arc<Vec<RetrievedChunk>>> {
        self.cache.get(&(query.to_string(), k)).await
    }

    pub async fn insert(&self, query: &str, k: usize, results: Arc<Vec<RetrievedChunk>>) {
        self.cache.insert((query.to_string(), k), results).await;
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Live entries after pending evictions have been applied.
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = RetrievalCache::new(Duration::from_millis(100), 64);
        cache.insert("first", 6, Arc::new(Vec::new())).await;
        assert!(cache.get("first", 6).await.is_some());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(cache.get("first", 6).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted_without_lookup() {
        let cache = RetrievalCache::new(Duration::from_millis(100), 100_000);
        for i in 0..1_000 {
            cache.insert(&format!("query {}", i), 6, Arc::new(Vec::new())).await;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        cache.insert("fresh", 6, Arc::new(Vec::new())).await;

        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_bounds_entry_count() {
        let cache = RetrievalCache::new(Duration::from_secs(300), 50);
        for i in 0..500 {
            cache.insert(&format!("query {}", i), 6, Arc::new(Vec::new())).await;
        }
        assert!(cache.len().await <= 50);
    }

    #[tokio::test]
    async fn test_key_includes_k() {
        let cache = RetrievalCache::new(Duration::from_secs(300), 64);
        cache.insert("q", 6, Arc::new(Vec::new())).await;
        assert!(cache.get("q", 6).await.is_some());
        assert!(cache.get("q", 3).await.is_none());
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }
}
