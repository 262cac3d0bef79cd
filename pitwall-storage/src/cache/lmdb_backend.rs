//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each session is one record
//! under its fixed-width [`SessionKey::storage_key`], so a season's entries
//! share a key prefix.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and counts
//! - Write transactions for `put`, `delete`, `invalidate_season` and `clear`
//!
//! `invalidate_season` scans and deletes inside one write transaction, so a
//! concurrent `put` for the season lands either before or after it.
//!
//! A write commits the whole record or nothing, so readers never observe a
//! partially written entry.

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use pitwall_core::{CacheEntry, PitwallResult, SessionKey, StorageError};
use tracing::{debug, warn};

use super::record;
use super::traits::{CacheStats, DurableStore};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to PitwallError.
impl From<LmdbCacheError> for pitwall_core::PitwallError {
    fn from(e: LmdbCacheError) -> Self {
        pitwall_core::PitwallError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

fn txn_failed(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed [`DurableStore`].
///
/// # Example
///
/// ```ignore
/// use pitwall_storage::LmdbCacheBackend;
///
/// let backend = LmdbCacheBackend::new("/var/cache/pitwall", 1024)?;
/// backend.put(&entry).await?;
/// let stored = backend.get(&entry.key).await?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Hit, miss and corruption counters.
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Open (or create) the store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not truncated or modified by anything but LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb.saturating_mul(1024 * 1024))
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_failed)?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_failed)?;

        debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB cache");

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    /// Store `bytes` verbatim under `key`, bypassing record encoding.
    ///
    /// Nothing validates `bytes`; a malformed record reads back as a miss
    /// and is counted in [`CacheStats::corrupt_reads`].
    pub fn put_raw(&self, key: &SessionKey, bytes: &[u8]) -> Result<(), LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_failed)?;
        self.db
            .put(&mut wtxn, &key.storage_key(), bytes)
            .map_err(txn_failed)?;
        wtxn.commit().map_err(txn_failed)
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self, corrupt: bool) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
            if corrupt {
                stats.corrupt_reads += 1;
            }
        }
    }

    fn entry_count(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_failed)?;
        self.db.len(&rtxn).map_err(txn_failed)
    }
}

#[async_trait]
impl DurableStore for LmdbCacheBackend {
    async fn get(&self, key: &SessionKey) -> PitwallResult<Option<CacheEntry>> {
        let rtxn = self.env.read_txn().map_err(txn_failed)?;

        match self.db.get(&rtxn, &key.storage_key()) {
            Ok(Some(bytes)) => match record::decode(key, bytes) {
                Ok(entry) => {
                    self.record_hit();
                    Ok(Some(entry))
                }
                Err(e) => {
                    warn!(
                        season = key.season,
                        round = key.round,
                        session = %key.session_type,
                        error = %e,
                        "Discarding unreadable durable cache record"
                    );
                    self.record_miss(true);
                    Ok(None)
                }
            },
            Ok(None) => {
                self.record_miss(false);
                Ok(None)
            }
            Err(e) => {
                self.record_miss(false);
                Err(txn_failed(e).into())
            }
        }
    }

    async fn put(&self, entry: &CacheEntry) -> PitwallResult<()> {
        let bytes = record::encode(entry).map_err(|e| StorageError::EncodeFailed {
            key: entry.key,
            reason: e.to_string(),
        })?;

        let mut wtxn = self.env.write_txn().map_err(txn_failed)?;

        self.db
            .put(&mut wtxn, &entry.key.storage_key(), &bytes)
            .map_err(txn_failed)?;

        wtxn.commit().map_err(txn_failed)?;

        debug!(
            season = entry.key.season,
            round = entry.key.round,
            session = %entry.key.session_type,
            bytes = bytes.len(),
            "Stored durable cache record"
        );
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> PitwallResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_failed)?;

        let deleted = self
            .db
            .delete(&mut wtxn, &key.storage_key())
            .map_err(txn_failed)?;

        wtxn.commit().map_err(txn_failed)?;

        Ok(deleted)
    }

    async fn invalidate_season(&self, season: u16) -> PitwallResult<u64> {
        let prefix = SessionKey::season_prefix(season);
        let mut wtxn = self.env.write_txn().map_err(txn_failed)?;

        let keys = self
            .db
            .prefix_iter(&wtxn, &prefix[..])
            .map_err(txn_failed)?
            .map(|item| item.map(|(key, _)| key.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(txn_failed)?;

        let mut deleted = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_failed)? {
                deleted += 1;
            }
        }

        wtxn.commit().map_err(txn_failed)?;

        debug!(season, deleted, "Invalidated durable season");
        Ok(deleted)
    }

    async fn clear(&self) -> PitwallResult<u64> {
        let removed = self.entry_count()?;

        let mut wtxn = self.env.write_txn().map_err(txn_failed)?;
        self.db.clear(&mut wtxn).map_err(txn_failed)?;

        wtxn.commit().map_err(txn_failed)?;

        Ok(removed)
    }

    async fn stats(&self) -> PitwallResult<CacheStats> {
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = self.entry_count()?;
        Ok(stats)
    }
}
