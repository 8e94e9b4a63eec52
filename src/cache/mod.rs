//! TTL + LRU cache (spec §4.1, `[C1-CACHE]`).
//!
//! Grounded on `original_source/packages/core/monkey_coder/cache/base.py`'s
//! `TTLRUCache` (an `OrderedDict`-backed combined TTL+LRU store) and on the
//! teacher's `agent::cache::LLMCache`, which already wraps a concurrent map
//! for LLM response memoization. This version generalizes both: it is
//! generic over the stored value, fully thread-safe, and exposes the
//! hit/miss/eviction/expired counters spec §4.1 requires for `stats()`.

pub mod typed;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// A single stored value plus its lifecycle metadata (spec §3 `CacheEntry<V>`).
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub hits: u64,
}

struct Record<V> {
    entry: CacheEntry<V>,
    /// Monotonically increasing access tick. Because the counter never
    /// repeats, the LRU victim (lowest tick) is always unambiguous — this
    /// is how the insertion-order tie-break in spec §4.1 falls out for
    /// free: two entries touched "at the same time" still get distinct
    /// ticks in the order they were actually processed.
    tick: u64,
}

/// Snapshot returned by [`TtlLruCache::stats`] (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub max_entries: usize,
    pub default_ttl_s: u64,
}

struct Inner<V> {
    store: HashMap<String, Record<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
    clock: u64,
}

impl<V> Inner<V> {
    fn purge_expired(&mut self, now: Instant) {
        let expired_keys: Vec<String> = self
            .store
            .iter()
            .filter(|(_, r)| r.entry.expires_at < now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired_keys {
            self.store.remove(&key);
            self.expired += 1;
        }
    }

    fn evict_lru(&mut self, max_entries: usize) {
        while self.store.len() > max_entries {
            let victim = self
                .store
                .iter()
                .min_by_key(|(_, r)| r.tick)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    self.store.remove(&key);
                    self.evictions += 1;
                }
                None => break,
            }
        }
    }
}

/// Bounded associative store from string key to value `V`, with per-entry
/// expiry and strict-LRU eviction. All operations are total: none of them
/// ever panics or returns an error (spec §4.1 "Failure semantics").
pub struct TtlLruCache<V> {
    name: String,
    max_entries: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlLruCache<V> {
    pub fn new(name: impl Into<String>, max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            max_entries,
            default_ttl,
            inner: Mutex::new(Inner {
                store: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                expired: 0,
                clock: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts or replaces `key`, moving it to most-recently-used and
    /// evicting the least-recently-used entry until the cache is back
    /// within `max_entries`.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.purge_expired(now);
        inner.clock += 1;
        let tick = inner.clock;
        inner.store.insert(
            key.to_string(),
            Record {
                entry: CacheEntry {
                    value,
                    created_at: now,
                    expires_at: now + ttl.unwrap_or(self.default_ttl),
                    hits: 0,
                },
                tick,
            },
        );
        inner.evict_lru(self.max_entries);
    }

    /// Returns `None` for an absent or expired key (counted as a miss, with
    /// expired entries additionally bumping `expired`); otherwise touches
    /// the entry to MRU and returns a clone of its value.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.purge_expired(now);
        inner.clock += 1;
        let tick = inner.clock;
        match inner.store.get_mut(key) {
            None => {
                inner.misses += 1;
                None
            }
            Some(record) => {
                if record.entry.expires_at < now {
                    inner.store.remove(key);
                    inner.expired += 1;
                    inner.misses += 1;
                    None
                } else {
                    record.entry.hits += 1;
                    record.tick = tick;
                    let value = record.entry.value.clone();
                    inner.hits += 1;
                    Some(value)
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.purge_expired(now);
        CacheStats {
            size: inner.store.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expired: inner.expired,
            max_entries: self.max_entries,
            default_ttl_s: self.default_ttl.as_secs(),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.store.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
        inner.expired = 0;
    }

    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.purge_expired(Instant::now());
        inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registers caches by name so operational code can aggregate stats across
/// every instance in the process (spec §4.1: "registration is the only side
/// effect across instances"). Mirrors the teacher's pattern of module-level
/// registries (`CACHE_REGISTRY` in the original source).
pub trait NamedCacheStats: Send + Sync {
    fn cache_name(&self) -> &str;
    fn cache_stats(&self) -> CacheStats;
}

impl<V: Clone + Send + Sync> NamedCacheStats for TtlLruCache<V> {
    fn cache_name(&self) -> &str {
        self.name()
    }

    fn cache_stats(&self) -> CacheStats {
        self.stats()
    }
}

lazy_static! {
    static ref CACHE_REGISTRY: Mutex<Vec<std::sync::Weak<dyn NamedCacheStats>>> =
        Mutex::new(Vec::new());
}

static REGISTRATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Registers `cache` in the process-wide registry. Returns a monotonically
/// increasing registration id (unused by callers today, but keeps parity
/// with the original `CACHE_REGISTRY`'s append-only semantics).
pub fn register_cache(cache: std::sync::Arc<dyn NamedCacheStats>) -> u64 {
    let mut registry = CACHE_REGISTRY.lock().expect("registry mutex poisoned");
    registry.push(std::sync::Arc::downgrade(&cache));
    REGISTRATION_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Aggregates stats from every still-live registered cache.
pub fn registry_stats() -> Vec<(String, CacheStats)> {
    let mut registry = CACHE_REGISTRY.lock().expect("registry mutex poisoned");
    registry.retain(|weak| weak.strong_count() > 0);
    registry
        .iter()
        .filter_map(|weak| weak.upgrade())
        .map(|cache| (cache.cache_name().to_string(), cache.cache_stats()))
        .collect()
}
