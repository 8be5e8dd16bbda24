// Process-local TTL cache shared by every search handler

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::CacheError;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStats {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub eviction_count: usize,
    pub total_lookups: usize,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    // None keeps the store unbounded
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            max_entries: None,
        }
    }
}

/// Key-value store with per-entry time-to-live.
///
/// An entry whose TTL has elapsed is never returned: `get` treats it as
/// absent and drops it. Implementations must be safe to share across tasks.
pub trait CacheStore<V>: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<V>, CacheError>;

    // `None` uses the store's default TTL
    fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), CacheError>;

    // Drops every entry and returns how many were removed
    fn flush_all(&self) -> Result<usize, CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    // None when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_alive(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

pub struct TtlCache<V> {
    store: DashMap<String, CacheEntry<V>>,
    config: CacheConfig,
    cache_stats: Arc<RwLock<CacheStats>>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            store: DashMap::new(),
            config,
            cache_stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.cache_stats.read().clone();
        stats.items_count = self.store.len();
        stats
    }

    /// Removes every expired entry and returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| entry.is_alive(now));
        let removed = before.saturating_sub(self.store.len());
        if removed > 0 {
            self.cache_stats.write().expired_count += removed;
        }
        removed
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut stats = self.cache_stats.write();
        stats.total_lookups += 1;

        let alive = match self.store.get(key) {
            Some(entry) if entry.is_alive(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                stats.miss_count += 1;
                return None;
            }
        };

        match alive {
            Some(value) => {
                stats.hit_count += 1;
                Some(value)
            }
            None => {
                // Only drop it if nobody refreshed the key in between
                if self.store.remove_if(key, |_, e| !e.is_alive(now)).is_some() {
                    stats.expired_count += 1;
                }
                stats.miss_count += 1;
                None
            }
        }
    }

    pub(crate) fn set_at(&self, key: &str, value: V, ttl: Option<Duration>, now: Instant) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);

        if let Some(max) = self.config.max_entries {
            if !self.store.contains_key(key) && self.store.len() >= max {
                self.make_room(max, now);
            }
        }

        self.store.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now.checked_add(ttl),
            },
        );
    }

    fn make_room(&self, max: usize, now: Instant) {
        self.purge_expired_at(now);

        while self.store.len() >= max {
            let oldest = self
                .store
                .iter()
                // Entries that never expire go last
                .min_by_key(|e| (e.value().expires_at.is_none(), e.value().expires_at))
                .map(|e| e.key().clone());

            let Some(key) = oldest else { break };
            if self.store.remove(&key).is_some() {
                self.cache_stats.write().eviction_count += 1;
            }
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V: Clone + Send + Sync + 'static> CacheStore<V> for TtlCache<V> {
    fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        Ok(self.get_at(key, Instant::now()))
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.set_at(key, value, ttl, Instant::now());
        Ok(())
    }

    fn flush_all(&self) -> Result<usize, CacheError> {
        let flushed = self.store.len();
        self.store.clear();
        Ok(flushed)
    }
}
