//! Lap tables at each stage of ingestion: raw, validated, enriched, cached.

use crate::{Compound, CompoundFamily, SessionKey, Timestamp, TrackStatus, ValidationError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// RAW RECORDS
// ============================================================================

/// One provider row before validation, column name to loosely typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(BTreeMap<String, serde_json::Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<serde_json::Value> {
        self.0.remove(column)
    }

    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.0.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl From<BTreeMap<String, serde_json::Value>> for RawRecord {
    fn from(map: BTreeMap<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

// ============================================================================
// VALIDATED TABLE
// ============================================================================

/// A schema-consistent lap. Durations are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LapRow {
    pub driver: String,
    pub driver_number: String,
    pub lap_number: u32,
    pub lap_time: Option<f64>,
    /// Session time at the end of the lap.
    pub time: Option<f64>,
    pub stint: u32,
    pub compound: Compound,
    pub tyre_life: u32,
    pub fresh_tyre: bool,
    pub position: Option<u8>,
    pub track_status: TrackStatus,
    pub is_accurate: bool,
    pub round_number: u8,
    pub event_name: String,
}

/// Validated laps for one session, in provider order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedTable {
    pub key: SessionKey,
    pub rows: Vec<LapRow>,
}

impl ValidatedTable {
    pub fn new(key: SessionKey, rows: Vec<LapRow>) -> Self {
        Self { key, rows }
    }

    pub fn empty(key: SessionKey) -> Self {
        Self::new(key, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// ENRICHED TABLE
// ============================================================================

/// Columns added by the transformation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DerivedColumn {
    IsSlick,
    AbsoluteCompound,
    IsValid,
    DeltaToRep,
    PctFromRep,
    DeltaToLapRep,
    PctFromLapRep,
    DeltaToFastest,
    PctFromFastest,
    FuelAdjLapTime,
    GapToReference,
}

impl fmt::Display for DerivedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A validated lap plus its derived columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnrichedLap {
    pub base: LapRow,
    pub is_slick: bool,
    pub absolute_compound: Option<CompoundFamily>,
    pub is_valid: bool,
    pub delta_to_rep: Option<f64>,
    pub pct_from_rep: Option<f64>,
    pub delta_to_lap_rep: Option<f64>,
    pub pct_from_lap_rep: Option<f64>,
    pub delta_to_fastest: Option<f64>,
    pub pct_from_fastest: Option<f64>,
    pub fuel_adj_lap_time: Option<f64>,
    pub gap_to_reference: Option<f64>,
}

impl EnrichedLap {
    /// A lap with every derived column unset.
    pub fn from_base(base: LapRow) -> Self {
        Self {
            base,
            is_slick: false,
            absolute_compound: None,
            is_valid: false,
            delta_to_rep: None,
            pct_from_rep: None,
            delta_to_lap_rep: None,
            pct_from_lap_rep: None,
            delta_to_fastest: None,
            pct_from_fastest: None,
            fuel_adj_lap_time: None,
            gap_to_reference: None,
        }
    }

    /// Lap time for laps that count towards representative statistics.
    pub fn valid_lap_time(&self) -> Option<f64> {
        if self.is_valid {
            self.base.lap_time
        } else {
            None
        }
    }
}

/// Non-fatal conditions recorded while enriching a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// No compound mapping exists for a relative label at this event.
    UnmappedCompound {
        season: u16,
        round: u8,
        compound: Compound,
        rows: usize,
    },
    /// The requested reference driver has no laps in the session.
    ReferenceDriverAbsent { driver: String },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::UnmappedCompound {
                season,
                round,
                compound,
                rows,
            } => write!(
                f,
                "No compound mapping for {} at {} round {} ({} rows left unset)",
                compound, season, round, rows
            ),
            PipelineWarning::ReferenceDriverAbsent { driver } => {
                write!(f, "Reference driver {} has no laps in this session", driver)
            }
        }
    }
}

/// Analysis-ready table for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTable {
    pub key: SessionKey,
    pub reference_driver: Option<String>,
    pub laps: Vec<EnrichedLap>,
    pub warnings: Vec<PipelineWarning>,
    /// Rows the validator excluded, kept so consumers can see what was dropped.
    pub rejected_rows: Vec<ValidationError>,
}

impl EnrichedTable {
    pub fn len(&self) -> usize {
        self.laps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.laps.is_empty()
    }

    /// Attach the validator's row-level errors.
    pub fn with_rejected_rows(mut self, rejected: Vec<ValidationError>) -> Self {
        self.rejected_rows = rejected;
        self
    }

    /// The validated base columns, dropping every derived column.
    pub fn base_table(&self) -> ValidatedTable {
        ValidatedTable::new(
            self.key,
            self.laps.iter().map(|lap| lap.base.clone()).collect(),
        )
    }

    /// Drivers in order of first appearance.
    pub fn drivers(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for lap in &self.laps {
            if !seen.contains(&lap.base.driver.as_str()) {
                seen.push(lap.base.driver.as_str());
            }
        }
        seen
    }

    pub fn laps_for<'a>(&'a self, driver: &'a str) -> impl Iterator<Item = &'a EnrichedLap> + 'a {
        self.laps.iter().filter(move |lap| lap.base.driver == driver)
    }

    pub fn valid_laps(&self) -> impl Iterator<Item = &EnrichedLap> {
        self.laps.iter().filter(|lap| lap.is_valid)
    }

    /// SHA-256 over the canonical JSON encoding, hex-encoded.
    ///
    /// Two tables with equal fingerprints serialise to identical bytes.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// An enriched table with the timestamps that govern its freshness.
///
/// Both cache tiers hold the same `Arc`, so a memory-tier entry is a view of
/// the durable one rather than a separate copy.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: SessionKey,
    pub table: Arc<EnrichedTable>,
    pub fetched_at: Timestamp,
    pub ttl_expiry: Timestamp,
}

impl CacheEntry {
    pub fn new(
        key: SessionKey,
        table: Arc<EnrichedTable>,
        fetched_at: Timestamp,
        ttl_expiry: Timestamp,
    ) -> Self {
        Self {
            key,
            table,
            fetched_at,
            ttl_expiry,
        }
    }

    /// Fresh while `now < ttl_expiry`.
    pub fn is_fresh_at(&self, now: Timestamp) -> bool {
        now < self.ttl_expiry
    }
}
