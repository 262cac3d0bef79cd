//! Pitwall Pipeline - Validation and Enrichment
//!
//! Turns raw provider records into an analysis-ready [`EnrichedTable`]:
//! schema validation first, then the ordered derivation steps.

pub mod duration;
pub mod queries;
pub mod transform;
pub mod validator;

pub use duration::parse_duration;
pub use queries::{drivers_with_min_laps, safety_car_laps, teammate_order, LapMetric};
pub use transform::{transform, with_reference, DerivationStep, Frame, Pipeline};
pub use validator::{validate, ValidationOutcome, REQUIRED_COLUMNS};

use pitwall_core::{EnrichedTable, PipelineConfig, PitwallResult, RawRecord, SessionKey};

/// Validate and transform one session's raw records.
///
/// Row-level validation errors travel with the table as `rejected_rows`. A
/// structural failure is returned as [`pitwall_core::PitwallError::Validation`].
pub fn enrich(
    key: &SessionKey,
    records: &[RawRecord],
    config: &PipelineConfig,
) -> PitwallResult<EnrichedTable> {
    let outcome = validate(key, records)?;
    let enriched = transform(&outcome.table, config)?;
    Ok(enriched.with_rejected_rows(outcome.errors))
}
