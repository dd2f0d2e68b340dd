// crates/waypoint-server/src/middleware/cache.rs
// Named LRU+TTL caches for expensive call results

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Capacity and default TTL for one named cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub default_ttl: Duration,
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

struct Inner {
    map: HashMap<String, Entry>,
    /// Recency order, least-recent at the front. Capacities are small enough
    /// that the O(n) reorder on hit stays cheap.
    order: VecDeque<String>,
}

/// One LRU+TTL cache. Expired entries are invalidated lazily on access and
/// swept periodically; insertion evicts least-recently-used entries until the
/// size bound holds.
pub struct TtlLruCache {
    name: &'static str,
    config: CacheConfig,
    inner: Mutex<Inner>,
}

impl TtlLruCache {
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        let expired = match inner.map.get(key) {
            None => return None,
            Some(entry) => entry.expires_at <= Instant::now(),
        };
        if expired {
            inner.map.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }
        // Touch: move to most-recent
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());
        inner.map.get(key).map(|e| e.value.clone())
    }

    /// Insert with the cache's default TTL.
    pub fn insert(&self, key: String, value: Value) {
        self.insert_with_ttl(key, value, self.config.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: String, value: Value, ttl: Duration) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.map.insert(key.clone(), Entry {
            value,
            expires_at: Instant::now() + ttl,
        }).is_some()
        {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key);

        // Post-insertion bound: evict least-recently-used
        while inner.map.len() > self.config.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.map.remove(&oldest);
        }
    }

    /// Drop expired entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = inner.map.len();
        inner.map.retain(|_, e| e.expires_at > now);
        let map = &inner.map;
        // Borrow of map ends before order is touched
        let live: Vec<String> = inner.order.iter().filter(|k| map.contains_key(*k)).cloned().collect();
        inner.order = live.into();
        before - inner.map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.map.clear();
            inner.order.clear();
        }
    }
}

/// Which named cache a call site stores into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheName {
    /// Retrieval-augmented context lookups.
    Rag,
    /// Inference service results (model listings, generations).
    Ollama,
    /// Web-scraper fetches.
    Scraper,
    /// Everything else, including cacheable tool calls.
    General,
}

/// The gateway's four named caches plus the enable flag and sweeper.
pub struct CacheSet {
    pub rag: TtlLruCache,
    pub ollama: TtlLruCache,
    pub scraper: TtlLruCache,
    pub general: TtlLruCache,
    enabled: bool,
}

impl CacheSet {
    pub fn new(enabled: bool) -> Self {
        Self {
            rag: TtlLruCache::new("rag", CacheConfig {
                capacity: 256,
                default_ttl: Duration::from_secs(1800),
            }),
            ollama: TtlLruCache::new("ollama", CacheConfig {
                capacity: 128,
                default_ttl: Duration::from_secs(300),
            }),
            scraper: TtlLruCache::new("scraper", CacheConfig {
                capacity: 64,
                default_ttl: Duration::from_secs(3600),
            }),
            general: TtlLruCache::new("general", CacheConfig {
                capacity: 512,
                default_ttl: Duration::from_secs(600),
            }),
            enabled,
        }
    }

    fn cache(&self, name: CacheName) -> &TtlLruCache {
        match name {
            CacheName::Rag => &self.rag,
            CacheName::Ollama => &self.ollama,
            CacheName::Scraper => &self.scraper,
            CacheName::General => &self.general,
        }
    }

    pub fn get(&self, name: CacheName, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        self.cache(name).get(key)
    }

    pub fn insert(&self, name: CacheName, key: String, value: Value, ttl: Option<Duration>) {
        if !self.enabled {
            return;
        }
        let cache = self.cache(name);
        match ttl {
            Some(ttl) => cache.insert_with_ttl(key, value, ttl),
            None => cache.insert(key, value),
        }
    }

    pub fn clear_all(&self) {
        for cache in [&self.rag, &self.ollama, &self.scraper, &self.general] {
            cache.clear();
        }
    }

    /// Background sweep loop; exits when the shutdown signal flips.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let caches = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        for cache in [&caches.rag, &caches.ollama, &caches.scraper, &caches.general] {
                            let removed = cache.sweep();
                            if removed > 0 {
                                debug!(cache = cache.name, removed, "Swept expired cache entries");
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        // Sender gone or flag flipped: either way, stop sweeping
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// Derive a cache key as a pure function of its inputs.
pub fn cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]); // separator so ["ab","c"] != ["a","bc"]
    }
    let digest = hasher.finalize();
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn small_cache(capacity: usize, ttl: Duration) -> TtlLruCache {
        TtlLruCache::new("test", CacheConfig {
            capacity,
            default_ttl: ttl,
        })
    }

    #[test]
    fn test_insert_and_get() {
        let cache = small_cache(4, Duration::from_secs(60));
        cache.insert("k".into(), json!("v"));
        assert_eq!(cache.get("k"), Some(json!("v")));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_capacity_bound_holds_after_insertion() {
        let cache = small_cache(3, Duration::from_secs(60));
        for i in 0..10 {
            cache.insert(format!("k{i}"), json!(i));
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = small_cache(2, Duration::from_secs(60));
        cache.insert("a".into(), json!(1));
        cache.insert("b".into(), json!(2));
        // Touch "a" so "b" becomes least-recent
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), json!(3));
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_reinsert_same_key_does_not_grow() {
        let cache = small_cache(2, Duration::from_secs(60));
        cache.insert("a".into(), json!(1));
        cache.insert("a".into(), json!(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), Some(json!(2)));
    }

    #[test]
    fn test_expired_entry_lazily_invalidated() {
        let cache = small_cache(4, Duration::from_secs(60));
        cache.insert_with_ttl("k".into(), json!("v"), Duration::ZERO);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_sweep_removes_expired_only() {
        let cache = small_cache(8, Duration::from_secs(60));
        cache.insert_with_ttl("dead".into(), json!(1), Duration::ZERO);
        cache.insert("live".into(), json!(2));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("live").is_some());
    }

    #[test]
    fn test_disabled_set_never_hits() {
        let set = CacheSet::new(false);
        set.insert(CacheName::General, "k".into(), json!(1), None);
        assert_eq!(set.get(CacheName::General, "k"), None);
    }

    #[test]
    fn test_named_caches_are_separate() {
        let set = CacheSet::new(true);
        set.insert(CacheName::Rag, "k".into(), json!("rag"), None);
        set.insert(CacheName::Ollama, "k".into(), json!("ollama"), None);
        assert_eq!(set.get(CacheName::Rag, "k"), Some(json!("rag")));
        assert_eq!(set.get(CacheName::Ollama, "k"), Some(json!("ollama")));
        assert_eq!(set.get(CacheName::General, "k"), None);
    }

    #[test]
    fn test_cache_key_is_pure_and_separator_safe() {
        assert_eq!(cache_key(&["a", "b"]), cache_key(&["a", "b"]));
        assert_ne!(cache_key(&["ab", "c"]), cache_key(&["a", "bc"]));
        assert_ne!(cache_key(&["a"]), cache_key(&["b"]));
    }
}
