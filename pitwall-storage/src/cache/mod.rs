//! Two-tier cache for enriched session tables.
//!
//! - [`MemoryCache`]: bounded LRU inside the process; losing it only costs a
//!   durable read.
//! - [`DurableCache`]: TTL-stamped entries in a [`DurableStore`], normally
//!   [`LmdbCacheBackend`]. Expired entries stay stored as fallback values.
//! - [`ReadThroughCache`]: resolves a [`pitwall_core::SessionKey`] through
//!   both tiers, fetching and enriching on a miss with one fetch per key in
//!   flight.
//!
//! Reads return a [`TableRead`] that says where the table came from and
//! whether it is past its TTL.
//!
//! # Example
//!
//! ```ignore
//! let read = cache.get_table(key).await?;
//! match read.source() {
//!     ReadSource::StaleFallback => tracing::warn!(reason = ?read.degraded_reason(), "stale"),
//!     _ => {}
//! }
//! let table = read.into_table();
//! ```

pub mod durable;
mod flight;
pub mod freshness;
pub mod lmdb_backend;
pub mod memory;
pub mod read_through;
pub mod record;
pub mod traits;

pub use durable::{DurableCache, DurableRead, InMemoryDurableStore};
pub use freshness::{ReadSource, TableRead};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::MemoryCache;
pub use read_through::{OrchestratorStats, ReadThroughCache};
pub use record::RecordError;
pub use traits::{CacheStats, DurableStore};
