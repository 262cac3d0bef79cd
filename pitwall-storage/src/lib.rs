//! Pitwall Storage - session-table caching
//!
//! The memory and durable cache tiers and the read-through orchestrator that
//! fronts the session provider.

pub mod cache;

pub use cache::{
    CacheStats, DurableCache, DurableRead, DurableStore, InMemoryDurableStore, LmdbCacheBackend,
    LmdbCacheError, MemoryCache, OrchestratorStats, ReadSource, ReadThroughCache, RecordError,
    TableRead,
};
