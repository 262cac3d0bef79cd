//! TTL classification over a [`DurableStore`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use pitwall_core::{
    CacheEntry, EnrichedTable, PitwallResult, SessionKey, StorageError, Timestamp,
};

use super::traits::{CacheStats, DurableStore};

/// Outcome of a durable read.
#[derive(Debug, Clone, PartialEq)]
pub enum DurableRead {
    /// `now < ttl_expiry`.
    Fresh(CacheEntry),
    /// Past its TTL but still stored; usable as a degraded fallback.
    Stale(CacheEntry),
    Miss,
}

impl DurableRead {
    pub fn fresh(self) -> Option<CacheEntry> {
        match self {
            DurableRead::Fresh(entry) => Some(entry),
            _ => None,
        }
    }

    /// The stored entry regardless of freshness.
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            DurableRead::Fresh(entry) | DurableRead::Stale(entry) => Some(entry),
            DurableRead::Miss => None,
        }
    }
}

/// Durable tier: stamps entries with `fetched_at`/`ttl_expiry` on write and
/// classifies them on read. Stale entries are never deleted here.
pub struct DurableCache<S: DurableStore> {
    store: Arc<S>,
    ttl: TimeDelta,
}

impl<S: DurableStore> DurableCache<S> {
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self {
            store,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Build an entry for `table` fetched now.
    ///
    /// `fetched_at` is truncated to whole milliseconds, the resolution of the
    /// stored record, so an entry reads back exactly as written.
    pub fn new_entry(&self, key: SessionKey, table: EnrichedTable) -> CacheEntry {
        self.entry_at(key, Arc::new(table), Utc::now())
    }

    fn entry_at(&self, key: SessionKey, table: Arc<EnrichedTable>, now: Timestamp) -> CacheEntry {
        let fetched_at = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let ttl_expiry = fetched_at
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        CacheEntry::new(key, table, fetched_at, ttl_expiry)
    }

    /// Store `table` under `key`, overwriting any previous entry.
    pub async fn put(&self, key: SessionKey, table: EnrichedTable) -> PitwallResult<CacheEntry> {
        if table.key != key {
            return Err(StorageError::EncodeFailed {
                key,
                reason: format!("table belongs to {}", table.key),
            }
            .into());
        }
        let entry = self.new_entry(key, table);
        self.store(&entry).await?;
        Ok(entry)
    }

    /// Store an already stamped entry.
    pub async fn store(&self, entry: &CacheEntry) -> PitwallResult<()> {
        self.store.put(entry).await
    }

    pub async fn get(&self, key: &SessionKey) -> PitwallResult<DurableRead> {
        self.get_at(key, Utc::now()).await
    }

    /// Classify the stored entry for `key` as of `now`.
    pub async fn get_at(&self, key: &SessionKey, now: Timestamp) -> PitwallResult<DurableRead> {
        Ok(match self.store.get(key).await? {
            Some(entry) if entry.is_fresh_at(now) => DurableRead::Fresh(entry),
            Some(entry) => DurableRead::Stale(entry),
            None => DurableRead::Miss,
        })
    }

    pub async fn delete(&self, key: &SessionKey) -> PitwallResult<bool> {
        self.store.delete(key).await
    }

    pub async fn invalidate_season(&self, season: u16) -> PitwallResult<u64> {
        self.store.invalidate_season(season).await
    }

    pub async fn clear(&self) -> PitwallResult<u64> {
        self.store.clear().await
    }

    pub async fn stats(&self) -> PitwallResult<CacheStats> {
        self.store.stats().await
    }
}

/// Non-persistent [`DurableStore`] for tests and cache-less runs.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    entries: RwLock<BTreeMap<SessionKey, CacheEntry>>,
    stats: RwLock<CacheStats>,
    fail_writes: AtomicBool,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail until switched off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn record(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn get(&self, key: &SessionKey) -> PitwallResult<Option<CacheEntry>> {
        let entry = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(key)
            .cloned();
        self.record(entry.is_some());
        Ok(entry)
    }

    async fn put(&self, entry: &CacheEntry) -> PitwallResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::TransactionFailed {
                reason: "writes disabled".to_string(),
            }
            .into());
        }
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(entry.key, entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> PitwallResult<bool> {
        Ok(self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(key)
            .is_some())
    }

    async fn invalidate_season(&self, season: u16) -> PitwallResult<u64> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|k, _| k.season != season);
        Ok((before - entries.len()) as u64)
    }

    async fn clear(&self) -> PitwallResult<u64> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> PitwallResult<CacheStats> {
        let entry_count = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .len() as u64;
        let stats = self.stats.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(CacheStats {
            entry_count,
            ..stats.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_test_utils::fixtures::{enriched_table, RACE_2024_R05, SPRINT_2024_R05};

    fn cache(ttl: Duration) -> DurableCache<InMemoryDurableStore> {
        DurableCache::new(Arc::new(InMemoryDurableStore::new()), ttl)
    }

    #[tokio::test]
    async fn test_put_then_fresh_read() {
        let cache = cache(Duration::from_secs(3600));
        let entry = cache
            .put(RACE_2024_R05, enriched_table(RACE_2024_R05, 3))
            .await
            .unwrap();

        assert_eq!(entry.ttl_expiry - entry.fetched_at, TimeDelta::hours(1));
        assert_eq!(entry.fetched_at.timestamp_subsec_nanos() % 1_000_000, 0);
        assert_eq!(cache.get(&RACE_2024_R05).await.unwrap(), DurableRead::Fresh(entry));
    }

    #[tokio::test]
    async fn test_expired_entry_is_stale_not_deleted() {
        let cache = cache(Duration::from_secs(60));
        let entry = cache
            .put(RACE_2024_R05, enriched_table(RACE_2024_R05, 3))
            .await
            .unwrap();

        let later = entry.ttl_expiry;
        let read = cache.get_at(&RACE_2024_R05, later).await.unwrap();
        assert_eq!(read, DurableRead::Stale(entry.clone()));
        assert!(read.clone().fresh().is_none());
        assert_eq!(read.into_entry(), Some(entry));
        assert_eq!(cache.stats().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn test_put_overwrites_timestamps() {
        let cache = cache(Duration::from_secs(60));
        let first = cache
            .put(RACE_2024_R05, enriched_table(RACE_2024_R05, 3))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = cache
            .put(RACE_2024_R05, enriched_table(RACE_2024_R05, 4))
            .await
            .unwrap();

        assert!(second.fetched_at > first.fetched_at);
        let stored = cache.get(&RACE_2024_R05).await.unwrap().into_entry().unwrap();
        assert_eq!(stored.table.len(), 4);
    }

    #[tokio::test]
    async fn test_put_rejects_table_for_other_key() {
        let cache = cache(Duration::from_secs(60));
        let result = cache
            .put(SPRINT_2024_R05, enriched_table(RACE_2024_R05, 1))
            .await;
        assert!(result.is_err());
        assert_eq!(cache.get(&SPRINT_2024_R05).await.unwrap(), DurableRead::Miss);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let cache = cache(Duration::from_secs(60));
        cache.backend().set_fail_writes(true);
        assert!(cache
            .put(RACE_2024_R05, enriched_table(RACE_2024_R05, 1))
            .await
            .is_err());
    }
}
