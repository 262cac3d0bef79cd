//! Durable store trait and shared cache statistics.

use async_trait::async_trait;
use pitwall_core::{CacheEntry, PitwallResult, SessionKey};

/// Persistent backend for cache entries.
///
/// Implementations store one entry per [`SessionKey`], replace it atomically
/// on `put`, and never hand back a partially written entry. Unreadable or
/// corrupt data is reported as absent, not as an error.
///
/// The store has no notion of freshness; [`crate::DurableCache`] classifies
/// what it returns.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the entry stored for `key`, fresh or not.
    async fn get(&self, key: &SessionKey) -> PitwallResult<Option<CacheEntry>>;

    /// Store `entry`, replacing any entry for the same key.
    async fn put(&self, entry: &CacheEntry) -> PitwallResult<()>;

    /// Remove the entry for `key`. Returns whether one existed.
    async fn delete(&self, key: &SessionKey) -> PitwallResult<bool>;

    /// Remove every entry of one season. Returns how many were removed.
    async fn invalidate_season(&self, season: u16) -> PitwallResult<u64>;

    /// Remove every entry. Returns how many were removed.
    async fn clear(&self) -> PitwallResult<u64>;

    async fn stats(&self) -> PitwallResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, corrupt reads included.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Stored records that failed their integrity check.
    pub corrupt_reads: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
