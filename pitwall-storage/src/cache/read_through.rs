//! Read-through orchestrator over the memory and durable tiers.
//!
//! Resolution order for [`ReadThroughCache::get_table`]:
//!
//! 1. Fresh entry in the [`MemoryCache`]
//! 2. Fresh entry in the [`DurableCache`] (promoted into memory)
//! 3. Provider fetch, validation and enrichment, written through to both tiers
//!
//! Step 3 runs at most once per key at a time. Concurrent callers for the
//! same key wait on the in-flight fetch instead of starting their own. The
//! fetch itself runs on a spawned task, so a caller that gives up does not
//! cancel it for the others.
//!
//! An entry the durable tier failed to store is kept aside until a later
//! write for its key succeeds, so memory eviction cannot send a reader back
//! to an older durable copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use pitwall_core::{
    CacheEntry, CacheSettings, EnrichedTable, FetchError, PipelineConfig, PitwallError,
    PitwallResult, SessionKey, SessionProvider,
};
use tracing::{debug, info, warn};

use super::durable::{DurableCache, DurableRead};
use super::flight::{self, Flights, Join};
use super::freshness::{ReadSource, TableRead};
use super::lmdb_backend::LmdbCacheBackend;
use super::memory::MemoryCache;
use super::traits::{CacheStats, DurableStore};

/// Counters kept by the orchestrator itself.
#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    fetches: AtomicU64,
    coalesced_waits: AtomicU64,
    fetch_failures: AtomicU64,
    stale_fallbacks: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of orchestrator and tier statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestratorStats {
    /// Reads answered by a fresh memory entry.
    pub memory_hits: u64,
    /// Reads answered by a fresh durable entry.
    pub durable_hits: u64,
    /// Provider fetches started.
    pub fetches: u64,
    /// Reads that waited on another caller's fetch.
    pub coalesced_waits: u64,
    /// Fetches that ended in an error, fallback or not.
    pub fetch_failures: u64,
    /// Reads served from an expired entry after a failed fetch.
    pub stale_fallbacks: u64,
    /// Fetches currently running.
    pub in_flight: u64,
    pub memory: CacheStats,
    pub durable: CacheStats,
}

struct Inner<S: DurableStore, P: SessionProvider> {
    memory: MemoryCache,
    durable: DurableCache<S>,
    provider: Arc<P>,
    pipeline: PipelineConfig,
    fetch_timeout: Duration,
    flights: Arc<Flights>,
    /// Newest entry per key that exists only in this process.
    unpersisted: Mutex<HashMap<SessionKey, CacheEntry>>,
    counters: Counters,
}

/// The single entry point for enriched session tables.
///
/// Cheap to clone; clones share both tiers and the in-flight registry.
///
/// # Example
///
/// ```ignore
/// let cache = ReadThroughCache::open_lmdb(&settings, pipeline, provider)?;
/// let read = cache.get_table(SessionKey::new(2024, 5, SessionType::Race)).await?;
/// if read.is_stale() {
///     tracing::warn!(age = ?read.staleness(), "serving stale table");
/// }
/// ```
pub struct ReadThroughCache<S: DurableStore, P: SessionProvider> {
    inner: Arc<Inner<S, P>>,
}

impl<S: DurableStore, P: SessionProvider> Clone for ReadThroughCache<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: SessionProvider + 'static> ReadThroughCache<LmdbCacheBackend, P> {
    /// Open the LMDB store under `settings.cache_dir` and wire both tiers.
    pub fn open_lmdb(
        settings: &CacheSettings,
        pipeline: PipelineConfig,
        provider: Arc<P>,
    ) -> PitwallResult<Self> {
        let backend = LmdbCacheBackend::new(&settings.cache_dir, settings.lmdb_map_size_mb)?;
        Ok(Self::new(
            DurableCache::new(Arc::new(backend), settings.ttl()),
            provider,
            settings,
            pipeline,
        ))
    }
}

impl<S, P> ReadThroughCache<S, P>
where
    S: DurableStore + 'static,
    P: SessionProvider + 'static,
{
    pub fn new(
        durable: DurableCache<S>,
        provider: Arc<P>,
        settings: &CacheSettings,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                memory: MemoryCache::new(settings.memory_capacity),
                durable,
                provider,
                pipeline,
                fetch_timeout: settings.fetch_timeout(),
                flights: Arc::new(Flights::default()),
                unpersisted: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.inner.memory
    }

    pub fn durable(&self) -> &DurableCache<S> {
        &self.inner.durable
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.inner.pipeline
    }

    /// Resolve the enriched table for `key`.
    ///
    /// Returns a stale entry, marked as such, when the fetch fails for a
    /// reason other than structurally invalid data and an expired entry is
    /// still stored. Fails with the fetch error otherwise.
    pub async fn get_table(&self, key: SessionKey) -> PitwallResult<TableRead> {
        let inner = &self.inner;

        if let Some(entry) = inner.fresh_in_memory(&key) {
            Counters::bump(&inner.counters.memory_hits);
            return Ok(TableRead::new(entry, ReadSource::Memory));
        }

        match inner.durable.get(&key).await {
            Ok(DurableRead::Fresh(entry)) => {
                Counters::bump(&inner.counters.durable_hits);
                let entry = inner.memory.put(entry);
                return Ok(TableRead::new(entry, ReadSource::Durable));
            }
            Ok(DurableRead::Stale(_)) | Ok(DurableRead::Miss) => {}
            Err(e) => {
                warn!(
                    season = key.season,
                    round = key.round,
                    session = %key.session_type,
                    error = %e,
                    "Durable cache read failed, treating as miss"
                );
            }
        }

        let join = {
            let lock = inner.flights.lock();
            // A flight may have finished between the memory check and here.
            if let Some(entry) = inner.fresh_in_memory(&key) {
                Counters::bump(&inner.counters.memory_hits);
                return Ok(TableRead::new(entry, ReadSource::Memory));
            }
            lock.join(&inner.flights, key)
        };

        let rx = match join {
            Join::Leader(guard, rx) => {
                Counters::bump(&inner.counters.fetches);
                let task_inner = Arc::clone(inner);
                tokio::spawn(async move {
                    let result = task_inner.fetch_through(key).await;
                    guard.publish(result);
                });
                rx
            }
            Join::Follower(rx) => {
                Counters::bump(&inner.counters.coalesced_waits);
                debug!(
                    season = key.season,
                    round = key.round,
                    session = %key.session_type,
                    "Waiting on in-flight fetch"
                );
                rx
            }
        };

        flight::wait(key, rx).await
    }

    /// Store `table` under `key` in both tiers, replacing whatever is cached.
    ///
    /// The next [`get_table`](Self::get_table) for `key` returns this table
    /// until its TTL runs out. Fails without touching memory if the durable
    /// write fails.
    pub async fn put(&self, key: SessionKey, table: EnrichedTable) -> PitwallResult<CacheEntry> {
        let inner = &self.inner;
        let entry = inner.durable.put(key, table).await?;
        inner.persisted(&entry);
        inner.memory.put(entry.clone());
        debug!(
            season = key.season,
            round = key.round,
            session = %key.session_type,
            rows = entry.table.len(),
            "Stored table"
        );
        Ok(entry)
    }

    /// Resolve the table for `key` with gaps measured to `driver`.
    ///
    /// The cached table is left untouched; only the returned copy carries
    /// the requested reference.
    pub async fn get_table_with_reference(
        &self,
        key: SessionKey,
        driver: &str,
    ) -> PitwallResult<TableRead> {
        let read = self.get_table(key).await?;
        let driver = driver.trim().to_ascii_uppercase();
        if read.table().reference_driver.as_deref() == Some(driver.as_str()) {
            return Ok(read);
        }
        Ok(read.map_table(|table| pitwall_pipeline::with_reference(table, &driver)))
    }

    /// Drop `key` from both tiers. Returns whether the durable tier held it.
    pub async fn invalidate(&self, key: &SessionKey) -> PitwallResult<bool> {
        self.inner.memory.remove(key);
        self.inner.lock_unpersisted().remove(key);
        self.inner.durable.delete(key).await
    }

    /// Drop a whole season from both tiers. Returns the durable count.
    pub async fn invalidate_season(&self, season: u16) -> PitwallResult<u64> {
        self.inner.memory.invalidate_season(season);
        self.inner
            .lock_unpersisted()
            .retain(|key, _| key.season != season);
        let removed = self.inner.durable.invalidate_season(season).await?;
        info!(season, removed, "Invalidated season");
        Ok(removed)
    }

    /// Empty both tiers. Returns the durable count.
    pub async fn clear(&self) -> PitwallResult<u64> {
        self.inner.memory.clear();
        self.inner.lock_unpersisted().clear();
        self.inner.durable.clear().await
    }

    pub async fn stats(&self) -> PitwallResult<OrchestratorStats> {
        let counters = &self.inner.counters;
        Ok(OrchestratorStats {
            memory_hits: counters.memory_hits.load(Ordering::Relaxed),
            durable_hits: counters.durable_hits.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            coalesced_waits: counters.coalesced_waits.load(Ordering::Relaxed),
            fetch_failures: counters.fetch_failures.load(Ordering::Relaxed),
            stale_fallbacks: counters.stale_fallbacks.load(Ordering::Relaxed),
            in_flight: self.inner.flights.len() as u64,
            memory: self.inner.memory.stats(),
            durable: self.inner.durable.stats().await?,
        })
    }
}

impl<S, P> Inner<S, P>
where
    S: DurableStore,
    P: SessionProvider,
{
    /// Fresh entry held by this process, from the LRU or the unpersisted set.
    fn fresh_in_memory(&self, key: &SessionKey) -> Option<CacheEntry> {
        let now = Utc::now();
        self.memory.get_fresh(key, now).or_else(|| {
            self.unpersisted(key)
                .filter(|entry| entry.is_fresh_at(now))
                .map(|entry| self.memory.put(entry))
        })
    }

    // Entries are replaced whole, so a poisoned map is still consistent.
    fn lock_unpersisted(&self) -> MutexGuard<'_, HashMap<SessionKey, CacheEntry>> {
        self.unpersisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn unpersisted(&self, key: &SessionKey) -> Option<CacheEntry> {
        self.lock_unpersisted().get(key).cloned()
    }

    fn hold_unpersisted(&self, entry: &CacheEntry) {
        let mut held = self.lock_unpersisted();
        let newer = held
            .get(&entry.key)
            .map_or(true, |current| current.fetched_at <= entry.fetched_at);
        if newer {
            held.insert(entry.key, entry.clone());
        }
    }

    /// `entry` reached the durable tier; drop anything it supersedes.
    fn persisted(&self, entry: &CacheEntry) {
        let mut held = self.lock_unpersisted();
        if held
            .get(&entry.key)
            .is_some_and(|current| current.fetched_at <= entry.fetched_at)
        {
            held.remove(&entry.key);
        }
    }

    /// Fetch, enrich and write through, or fall back to a stale entry.
    async fn fetch_through(&self, key: SessionKey) -> PitwallResult<TableRead> {
        let started = std::time::Instant::now();
        let fetched = match tokio::time::timeout(self.fetch_timeout, self.fetch_and_enrich(&key)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                key,
                timeout: self.fetch_timeout,
            }
            .into()),
        };

        match fetched {
            Ok(table) => {
                let entry = self.durable.new_entry(key, table);
                match self.durable.store(&entry).await {
                    Ok(()) => self.persisted(&entry),
                    Err(e) => {
                        warn!(
                            season = key.season,
                            round = key.round,
                            session = %key.session_type,
                            error = %e,
                            "Durable cache write failed, serving from memory only"
                        );
                        self.hold_unpersisted(&entry);
                    }
                }
                let entry = self.memory.put(entry);
                info!(
                    season = key.season,
                    round = key.round,
                    session = %key.session_type,
                    rows = entry.table.len(),
                    rejected = entry.table.rejected_rows.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fetched and enriched session"
                );
                Ok(TableRead::new(entry, ReadSource::Fetched))
            }
            Err(error) => {
                Counters::bump(&self.counters.fetch_failures);
                self.fall_back(key, error).await
            }
        }
    }

    async fn fetch_and_enrich(&self, key: &SessionKey) -> PitwallResult<EnrichedTable> {
        let records = self.provider.fetch_session(key).await?;
        pitwall_pipeline::enrich(key, &records, &self.pipeline).map_err(|e| match e {
            PitwallError::Validation(source) if source.is_structural() => {
                FetchError::Schema { key: *key, source }.into()
            }
            other => other,
        })
    }

    async fn fall_back(&self, key: SessionKey, error: PitwallError) -> PitwallResult<TableRead> {
        if !error.allows_stale_fallback() {
            warn!(
                season = key.season,
                round = key.round,
                session = %key.session_type,
                error = %error,
                "Fetch failed"
            );
            return Err(error);
        }

        let stored = match self.durable.get(&key).await {
            Ok(read) => read.into_entry(),
            Err(e) => {
                warn!(error = %e, "Durable cache unreadable during fallback");
                None
            }
        };
        let candidate = [stored, self.memory.peek(&key), self.unpersisted(&key)]
            .into_iter()
            .flatten()
            .max_by_key(|entry| entry.fetched_at);

        match candidate {
            Some(entry) => {
                Counters::bump(&self.counters.stale_fallbacks);
                warn!(
                    season = key.season,
                    round = key.round,
                    session = %key.session_type,
                    fetched_at = %entry.fetched_at,
                    error = %error,
                    "Fetch failed, serving stale table"
                );
                Ok(TableRead::stale(entry, error))
            }
            None => {
                warn!(
                    season = key.season,
                    round = key.round,
                    session = %key.session_type,
                    error = %error,
                    "Fetch failed with nothing cached"
                );
                Err(error)
            }
        }
    }
}
