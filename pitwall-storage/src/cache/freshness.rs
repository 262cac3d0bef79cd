//! Read metadata returned by the orchestrator.
//!
//! Every table handed out carries where it came from and how old it is, so
//! callers can tell a degraded read from a normal one without asking again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pitwall_core::{CacheEntry, EnrichedTable, PitwallError, Timestamp};

/// Where a [`TableRead`] was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadSource {
    /// Fresh entry in the in-process LRU.
    Memory,
    /// Fresh entry in the durable store.
    Durable,
    /// Fetched, validated and enriched for this read (or a coalesced one).
    Fetched,
    /// Expired entry served because the fetch failed.
    StaleFallback,
}

/// A fully enriched table plus its provenance.
#[derive(Debug, Clone)]
pub struct TableRead {
    entry: CacheEntry,
    source: ReadSource,
    degraded: Option<PitwallError>,
}

impl TableRead {
    pub fn new(entry: CacheEntry, source: ReadSource) -> Self {
        Self {
            entry,
            source,
            degraded: None,
        }
    }

    /// A stale entry standing in for a failed fetch.
    pub fn stale(entry: CacheEntry, reason: PitwallError) -> Self {
        Self {
            entry,
            source: ReadSource::StaleFallback,
            degraded: Some(reason),
        }
    }

    pub fn table(&self) -> &EnrichedTable {
        &self.entry.table
    }

    /// Shared handle to the table.
    pub fn shared_table(&self) -> Arc<EnrichedTable> {
        Arc::clone(&self.entry.table)
    }

    pub fn into_table(self) -> Arc<EnrichedTable> {
        self.entry.table
    }

    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn fetched_at(&self) -> Timestamp {
        self.entry.fetched_at
    }

    pub fn ttl_expiry(&self) -> Timestamp {
        self.entry.ttl_expiry
    }

    /// True when the table is past its TTL. Advisory: the data is complete.
    pub fn is_stale(&self) -> bool {
        self.source == ReadSource::StaleFallback
    }

    /// Time since the table was fetched from the provider.
    pub fn staleness(&self) -> Duration {
        (Utc::now() - self.entry.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// True when no fetch was needed.
    pub fn was_cache_hit(&self) -> bool {
        matches!(self.source, ReadSource::Memory | ReadSource::Durable)
    }

    /// The fetch failure a stale read is standing in for.
    pub fn degraded_reason(&self) -> Option<&PitwallError> {
        self.degraded.as_ref()
    }

    /// Replace the table, keeping timestamps and provenance.
    pub fn map_table<F>(self, f: F) -> Self
    where
        F: FnOnce(&EnrichedTable) -> EnrichedTable,
    {
        let table = Arc::new(f(&self.entry.table));
        Self {
            entry: CacheEntry::new(
                self.entry.key,
                table,
                self.entry.fetched_at,
                self.entry.ttl_expiry,
            ),
            source: self.source,
            degraded: self.degraded,
        }
    }
}

impl AsRef<EnrichedTable> for TableRead {
    fn as_ref(&self) -> &EnrichedTable {
        self.table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_core::FetchError;
    use pitwall_test_utils::fixtures::{cache_entry, enriched_table, RACE_2024_R05};

    fn entry(age: chrono::Duration) -> CacheEntry {
        cache_entry(
            enriched_table(RACE_2024_R05, 3),
            Utc::now() - age,
            chrono::Duration::minutes(10),
        )
    }

    #[test]
    fn test_cache_hit_sources() {
        let read = TableRead::new(entry(chrono::Duration::zero()), ReadSource::Memory);
        assert!(read.was_cache_hit());
        assert!(!read.is_stale());
        assert!(read.degraded_reason().is_none());

        let fetched = TableRead::new(entry(chrono::Duration::zero()), ReadSource::Fetched);
        assert!(!fetched.was_cache_hit());
    }

    #[test]
    fn test_stale_read_reports_reason_and_age() {
        let reason: PitwallError = FetchError::Unavailable {
            key: RACE_2024_R05,
            reason: "503".to_string(),
        }
        .into();
        let read = TableRead::stale(entry(chrono::Duration::hours(2)), reason.clone());

        assert!(read.is_stale());
        assert_eq!(read.source(), ReadSource::StaleFallback);
        assert!(read.staleness() >= Duration::from_secs(7200));
        assert_eq!(
            read.degraded_reason().map(ToString::to_string),
            Some(reason.to_string())
        );
    }

    #[test]
    fn test_map_table_keeps_provenance() {
        let original = TableRead::new(entry(chrono::Duration::zero()), ReadSource::Durable);
        let fetched_at = original.fetched_at();
        let mapped = original.map_table(|t| {
            let mut t = t.clone();
            t.reference_driver = Some("VER".to_string());
            t
        });

        assert_eq!(mapped.source(), ReadSource::Durable);
        assert_eq!(mapped.fetched_at(), fetched_at);
        assert_eq!(mapped.table().reference_driver.as_deref(), Some("VER"));
    }
}
