//! Bounded, expiring authentication cache

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use realmgate_common::config::AuthCacheConfig;
use realmgate_common::error::{Error, Result};
use realmgate_common::metrics;

use crate::clock::Clock;

struct CacheEntry<V> {
    value: V,
    inserted_at: u64,
    last_access: u64,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Monotonic access counter driving LRU order
    tick: u64,
}

impl<K, V> CacheInner<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Capacity- and TTL-bounded map with least-recently-used eviction.
///
/// Expiry is lazy: an entry older than the TTL is treated as absent and
/// dropped when touched. Every operation reads the clock once, so an entry
/// found live is returned live.
pub struct AuthCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    capacity: usize,
    ttl_ms: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl<K, V> AuthCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache. A zero `ttl` is only accepted when `use_ttl` is false,
    /// in which case entries never expire.
    pub fn new(capacity: usize, ttl: Duration, use_ttl: bool, clock: Arc<dyn Clock>) -> Result<Self> {
        if use_ttl && ttl.is_zero() {
            return Err(Error::Validation(
                "Cache TTL must be positive when expiry is required".to_string(),
            ));
        }

        let ttl_ms = if use_ttl {
            Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
        } else {
            None
        };

        Ok(Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            capacity,
            ttl_ms,
            clock,
        })
    }

    pub fn from_config(config: &AuthCacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(
            config.max_capacity,
            Duration::from_millis(config.ttl_ms),
            config.use_ttl,
            clock,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_expired(&self, inserted_at: u64, now: u64) -> bool {
        self.ttl_ms
            .map_or(false, |ttl| now.saturating_sub(inserted_at) > ttl)
    }

    /// Get a live value
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => self.is_expired(entry.inserted_at, now),
            None => {
                metrics::record_cache_access(false);
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            metrics::record_cache_access(false);
            return None;
        }

        let tick = inner.next_tick();
        let entry = inner.entries.get_mut(key)?;
        entry.last_access = tick;
        metrics::record_cache_access(true);
        Some(entry.value.clone())
    }

    /// Insert a value, returning the live value it replaced.
    ///
    /// At capacity, expired entries are purged first and then the least
    /// recently used entry is evicted.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        if self.capacity == 0 {
            return None;
        }

        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            inner
                .entries
                .retain(|_, entry| !self.is_expired(entry.inserted_at, now));

            if inner.entries.len() >= self.capacity {
                let victim = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(k, _)| k.clone());

                if let Some(victim) = victim {
                    inner.entries.remove(&victim);
                    metrics::record_cache_eviction();
                    debug!("Evicted least recently used auth cache entry");
                }
            }
        }

        let previous = inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_access: tick,
            },
        );
        metrics::set_cache_size(inner.entries.len());

        previous
            .filter(|entry| !self.is_expired(entry.inserted_at, now))
            .map(|entry| entry.value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let now = self.clock.now_millis();
        self.inner
            .lock()
            .entries
            .remove(key)
            .filter(|entry| !self.is_expired(entry.inserted_at, now))
            .map(|entry| entry.value)
    }

    /// Drop every entry for which `keep` returns false
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.inner.lock().entries.retain(|k, entry| keep(k, &entry.value));
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
        metrics::set_cache_size(0);
    }

    /// Keys of live entries
    pub fn keys(&self) -> Vec<K> {
        let now = self.clock.now_millis();
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry.inserted_at, now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Values of live entries
    pub fn values(&self) -> Vec<V> {
        let now = self.clock.now_millis();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| !self.is_expired(entry.inserted_at, now))
            .map(|entry| entry.value.clone())
            .collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| !self.is_expired(entry.inserted_at, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
