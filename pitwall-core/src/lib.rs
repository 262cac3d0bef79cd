//! Pitwall Core - Session Table Types
//!
//! Pure data structures shared by the validator, the transformation pipeline,
//! and both cache tiers. This crate performs no I/O beyond reading config files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod enums;
pub mod error;
pub mod provider;
pub mod table;

pub use config::{CacheSettings, CompoundMapping, PipelineConfig, PitwallConfig};
pub use enums::{Compound, CompoundFamily, EnumParseError, SessionType, TrackStatus};
pub use error::{
    ConfigError, FetchError, PipelineError, PitwallError, PitwallResult, StorageError,
    ValidationError,
};
pub use provider::SessionProvider;
pub use table::{
    CacheEntry, DerivedColumn, EnrichedLap, EnrichedTable, LapRow, PipelineWarning, RawRecord,
    ValidatedTable,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// SESSION KEY
// ============================================================================

/// Identity of one race or sprint session.
///
/// One key addresses exactly one cache entry and one upstream fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub season: u16,
    pub round: u8,
    pub session_type: SessionType,
}

/// Encoded width of a [`SessionKey`] storage key.
pub const SESSION_KEY_LEN: usize = 4;

impl SessionKey {
    pub const fn new(season: u16, round: u8, session_type: SessionType) -> Self {
        Self {
            season,
            round,
            session_type,
        }
    }

    /// Fixed-width storage key: `[season BE (2)][round (1)][session type (1)]`.
    ///
    /// Big-endian season keeps every key of one season under a shared prefix.
    pub fn storage_key(&self) -> [u8; SESSION_KEY_LEN] {
        let season = self.season.to_be_bytes();
        [season[0], season[1], self.round, self.session_type.as_byte()]
    }

    /// Decode a storage key. Returns `None` for anything not produced by
    /// [`SessionKey::storage_key`].
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SESSION_KEY_LEN {
            return None;
        }
        let season = u16::from_be_bytes([bytes[0], bytes[1]]);
        let session_type = SessionType::from_byte(bytes[3])?;
        Some(Self::new(season, bytes[2], session_type))
    }

    /// Prefix shared by every storage key of `season`.
    pub fn season_prefix(season: u16) -> [u8; 2] {
        season.to_be_bytes()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-R{:02}-{}", self.season, self.round, self.session_type)
    }
}
