//! Bounded in-process LRU of enriched tables.
//!
//! Entries are [`CacheEntry`] values; the table inside is shared through an
//! `Arc`, so a hit clones a pointer, not the laps. All state lives behind one
//! mutex per cache instance, which also serialises recency updates.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use pitwall_core::{CacheEntry, SessionKey, Timestamp};
use tracing::trace;

use super::traits::CacheStats;

/// Least-recently-used cache keyed by [`SessionKey`].
///
/// The entry whose most recent `get` or `put` is oldest is evicted first.
/// Recency order starts as insertion order, so ties resolve to the earlier
/// insertion.
pub struct MemoryCache {
    capacity: usize,
    state: Mutex<LruState>,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<SessionKey, CacheEntry>,
    /// Front is least recently used.
    order: VecDeque<SessionKey>,
    stats: CacheStats,
}

impl LruState {
    fn touch(&mut self, key: &SessionKey) {
        self.order.retain(|k| k != key);
        self.order.push_back(*key);
    }

    fn forget(&mut self, key: &SessionKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }
}

impl MemoryCache {
    /// Create a cache holding at most `capacity` tables. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Every operation leaves the state consistent before it can panic, so a
    // poisoned lock is still safe to reuse.
    fn lock(&self) -> MutexGuard<'_, LruState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &SessionKey) -> Option<CacheEntry> {
        let mut state = self.lock();
        match state.entries.get(key).cloned() {
            Some(entry) => {
                state.touch(key);
                state.stats.hits += 1;
                Some(entry)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Like [`get`](Self::get), but an entry expired as of `now` is a miss
    /// and keeps its recency.
    pub fn get_fresh(&self, key: &SessionKey, now: Timestamp) -> Option<CacheEntry> {
        let mut state = self.lock();
        match state.entries.get(key).filter(|e| e.is_fresh_at(now)).cloned() {
            Some(entry) => {
                state.touch(key);
                state.stats.hits += 1;
                Some(entry)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Look up `key` without changing recency or statistics.
    pub fn peek(&self, key: &SessionKey) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Insert `entry` and return the entry now resident for its key.
    ///
    /// An entry older than the resident one (by `fetched_at`) is ignored and
    /// the resident entry is returned instead, so readers never move
    /// backwards in time. Either way the key becomes most recently used.
    pub fn put(&self, entry: CacheEntry) -> CacheEntry {
        if self.capacity == 0 {
            return entry;
        }

        let mut state = self.lock();
        let key = entry.key;

        if let Some(resident) = state.entries.get(&key) {
            if resident.fetched_at > entry.fetched_at {
                let resident = resident.clone();
                state.touch(&key);
                return resident;
            }
        } else if state.entries.len() >= self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.entries.remove(&evicted);
                state.stats.evictions += 1;
                trace!(
                    season = evicted.season,
                    round = evicted.round,
                    session = %evicted.session_type,
                    "Evicted table from memory cache"
                );
            }
        }

        state.entries.insert(key, entry.clone());
        state.touch(&key);
        entry
    }

    /// Drop the entry for `key`. Returns whether one was present.
    pub fn remove(&self, key: &SessionKey) -> bool {
        self.lock().forget(key)
    }

    /// Drop every entry of `season`. Returns how many were dropped.
    pub fn invalidate_season(&self, season: u16) -> usize {
        let mut state = self.lock();
        let keys: Vec<SessionKey> = state
            .entries
            .keys()
            .filter(|k| k.season == season)
            .copied()
            .collect();
        keys.iter().filter(|k| state.forget(k)).count()
    }

    /// Drop everything. Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.order.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entry_count: state.entries.len() as u64,
            ..state.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use pitwall_core::SessionType;
    use pitwall_test_utils::fixtures::{cache_entry, enriched_table};
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_715_000_000 + secs, 0).unwrap()
    }

    fn key(round: u8) -> SessionKey {
        SessionKey::new(2024, round, SessionType::Race)
    }

    fn entry(key: SessionKey, fetched_secs: i64) -> CacheEntry {
        cache_entry(enriched_table(key, 2), at(fetched_secs), Duration::hours(1))
    }

    #[test]
    fn test_evicts_least_recently_inserted() {
        let cache = MemoryCache::new(2);
        cache.put(entry(key(1), 0));
        cache.put(entry(key(2), 0));
        cache.put(entry(key(3), 0));

        assert!(cache.peek(&key(1)).is_none());
        assert!(cache.peek(&key(2)).is_some());
        assert!(cache.peek(&key(3)).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = MemoryCache::new(2);
        cache.put(entry(key(1), 0));
        cache.put(entry(key(2), 0));
        assert!(cache.get(&key(1)).is_some());
        cache.put(entry(key(3), 0));

        assert!(cache.peek(&key(1)).is_some());
        assert!(cache.peek(&key(2)).is_none());
    }

    #[test]
    fn test_put_refreshes_recency() {
        let cache = MemoryCache::new(2);
        cache.put(entry(key(1), 0));
        cache.put(entry(key(2), 0));
        cache.put(entry(key(1), 10));
        cache.put(entry(key(3), 0));

        assert!(cache.peek(&key(1)).is_some());
        assert!(cache.peek(&key(2)).is_none());
    }

    #[test]
    fn test_peek_does_not_refresh_recency() {
        let cache = MemoryCache::new(2);
        cache.put(entry(key(1), 0));
        cache.put(entry(key(2), 0));
        assert!(cache.peek(&key(1)).is_some());
        cache.put(entry(key(3), 0));

        assert!(cache.peek(&key(1)).is_none());
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_keeps_recency() {
        let cache = MemoryCache::new(2);
        cache.put(entry(key(1), 0));
        cache.put(entry(key(2), 0));

        assert!(cache.get_fresh(&key(1), at(7200)).is_none());
        cache.put(entry(key(3), 0));
        assert!(cache.peek(&key(1)).is_none());

        assert!(cache.get_fresh(&key(2), at(60)).is_some());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_older_entry_never_replaces_newer() {
        let cache = MemoryCache::new(4);
        let newer = entry(key(1), 100);
        cache.put(newer.clone());

        let resident = cache.put(entry(key(1), 50));
        assert_eq!(resident.fetched_at, newer.fetched_at);
        assert_eq!(cache.get(&key(1)).unwrap().fetched_at, at(100));
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let cache = MemoryCache::new(0);
        let e = entry(key(1), 0);
        assert_eq!(cache.put(e.clone()), e);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_season_and_clear() {
        let cache = MemoryCache::new(8);
        cache.put(entry(key(1), 0));
        cache.put(entry(key(2), 0));
        cache.put(entry(SessionKey::new(2023, 1, SessionType::Sprint), 0));

        assert_eq!(cache.invalidate_season(2024), 2);
        assert_eq!(cache.len(), 1);
        assert!(!cache.remove(&key(1)));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = MemoryCache::new(2);
        cache.put(entry(key(1), 0));
        cache.get(&key(1));
        cache.get(&key(2));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    proptest! {
        #[test]
        fn prop_len_never_exceeds_capacity(
            capacity in 0usize..6,
            rounds in prop::collection::vec(1u8..12, 0..40),
        ) {
            let cache = MemoryCache::new(capacity);
            for round in rounds {
                cache.put(entry(key(round), 0));
                prop_assert!(cache.len() <= capacity);
            }
        }
    }
}
