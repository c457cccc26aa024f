//! Process-lifetime TTL caches keyed by domain.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of a cache's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub cache_size: usize,
    /// Entries past their TTL that have not been evicted yet.
    pub expired_count: usize,
}

/// Domain-keyed cache with a single TTL for every entry.
///
/// Keys are lower-cased on every access, so lookups are case-insensitive.
/// Expired entries are dropped lazily by [`TtlCache::get`] or in bulk by
/// [`TtlCache::clear_expired`]. The lock is never held across an await point.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, (V, Instant)>>,
    ttl: Duration,
}

/// Resolved MX hosts per domain, in preference order. An empty list is a
/// cached negative answer.
pub type MxCache = TtlCache<Vec<String>>;

/// Whether a domain accepts mail for any local part.
pub type CatchAllCache = TtlCache<bool>;

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, stored_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(stored_at) > self.ttl
    }

    pub fn get(&self, domain: &str) -> Option<V> {
        let key = domain.to_lowercase();
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let (value, stored_at) = entries.get(&key)?;
        if !self.is_expired(*stored_at, now) {
            return Some(value.clone());
        }
        entries.remove(&key);
        None
    }

    pub fn set(&self, domain: &str, value: V) {
        let key = domain.to_lowercase();
        self.entries.lock().insert(key, (value, Instant::now()));
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (_, stored_at)| !self.is_expired(*stored_at, now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.lock();
        CacheStats {
            cache_size: entries.len(),
            expired_count: entries
                .values()
                .filter(|(_, stored_at)| self.is_expired(*stored_at, now))
                .count(),
        }
    }
}

impl MxCache {
    /// Records that `domain` has no mail exchanger.
    pub fn set_negative(&self, domain: &str) {
        self.set(domain, Vec::new());
    }
}
