//! Per-node TTL caches (SPEC_FULL.md §5). Each node (`Router`, the combined
//! `DataExecutor` unit, `Composer`, `DirectResponse`) owns one instance keyed
//! by a content hash of its relevant state fields, capacity- and time-bounded
//! independently, `dashmap`-backed the way the donor keeps process-local
//! state (see `qdrant_sidecar.rs`'s use of `DashMap` for sidecar handles).
//!
//! The donor's own cache (`graphs/cache.py`, recovered via original_source)
//! hashes keys with SHA-256 to avoid retaining PII in key material; this
//! port uses `DefaultHasher` instead (documented in DESIGN.md) since no
//! cryptographic hash crate is otherwise part of the donor's dependency
//! stack and cache keys are never compared across processes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Snapshot exposed through `GET /health` and the cache-admin path, mirroring
/// the donor-adjacent `LRUCache.stats` property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub name: String,
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct Entry<T> {
    value: T,
    inserted_at: Instant,
}

/// LRU-with-TTL cache. Eviction is approximate: capacity overflow evicts in
/// insertion order (a FIFO ring), which is the donor's own `graphs/cache.py`
/// tradeoff for a process-local best-effort cache, not a durable store.
pub struct TtlCache<T: Clone> {
    name: &'static str,
    max_size: usize,
    ttl: Duration,
    entries: DashMap<u64, Entry<T>>,
    order: Mutex<std::collections::VecDeque<u64>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(name: &'static str, max_size: usize, ttl: Duration) -> Self {
        Self {
            name,
            max_size,
            ttl,
            entries: DashMap::new(),
            order: Mutex::new(std::collections::VecDeque::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key_for(parts: &[&str]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for part in parts {
            part.hash(&mut hasher);
            0u8.hash(&mut hasher); // separator so ("ab","c") != ("a","bc")
        }
        hasher.finish()
    }

    pub fn get(&self, key: u64) -> Option<T> {
        if let Some(entry) = self.entries.get(&key) {
            if entry.inserted_at.elapsed() <= self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: u64, value: T) {
        if !self.entries.contains_key(&key) {
            let mut order = self.order.lock().unwrap();
            order.push_back(key);
            while order.len() > self.max_size {
                if let Some(oldest) = order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
        self.order.lock().unwrap().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            name: self.name.to_string(),
            size: self.entries.len(),
            max_size: self.max_size,
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_evicts_by_capacity() {
        let cache: TtlCache<String> = TtlCache::new("test", 2, Duration::from_secs(60));
        let k1 = TtlCache::<String>::key_for(&["a"]);
        let k2 = TtlCache::<String>::key_for(&["b"]);
        let k3 = TtlCache::<String>::key_for(&["c"]);
        cache.insert(k1, "1".to_string());
        cache.insert(k2, "2".to_string());
        cache.insert(k3, "3".to_string());
        assert_eq!(cache.get(k1), None);
        assert_eq!(cache.get(k2), Some("2".to_string()));
        assert_eq!(cache.get(k3), Some("3".to_string()));
    }

    #[test]
    fn expires_by_ttl() {
        let cache: TtlCache<i32> = TtlCache::new("test", 10, Duration::from_millis(0));
        let k = TtlCache::<i32>::key_for(&["x"]);
        cache.insert(k, 42);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(k), None);
    }

    #[test]
    fn tracks_hit_rate() {
        let cache: TtlCache<i32> = TtlCache::new("test", 10, Duration::from_secs(60));
        let k = TtlCache::<i32>::key_for(&["x"]);
        cache.insert(k, 1);
        cache.get(k);
        cache.get(TtlCache::<i32>::key_for(&["y"]));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }
}
