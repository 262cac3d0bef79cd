//! Schema validation for raw provider records.
//!
//! A record that fails any column check is excluded and reported; the batch
//! only fails when a required column is missing from every record.

use crate::duration::parse_duration;
use pitwall_core::{
    Compound, LapRow, RawRecord, SessionKey, TrackStatus, ValidatedTable, ValidationError,
};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Columns every record must carry. Nullable columns must still be present.
pub const REQUIRED_COLUMNS: [&str; 14] = [
    "Driver",
    "DriverNumber",
    "LapNumber",
    "LapTime",
    "Time",
    "Stint",
    "Compound",
    "TyreLife",
    "FreshTyre",
    "Position",
    "TrackStatus",
    "IsAccurate",
    "RoundNumber",
    "EventName",
];

const MAX_POSITION: u64 = 25;

/// Validated rows plus every row-level error, ordered by row index.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub table: ValidatedTable,
    pub errors: Vec<ValidationError>,
}

impl ValidationOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of distinct rows that were excluded.
    pub fn rejected_row_count(&self) -> usize {
        self.errors
            .iter()
            .filter_map(ValidationError::row)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Validate `records` fetched for `key`.
///
/// Empty input yields an empty table. Row order is preserved.
pub fn validate(key: &SessionKey, records: &[RawRecord]) -> Result<ValidationOutcome, ValidationError> {
    if records.is_empty() {
        return Ok(ValidationOutcome {
            table: ValidatedTable::empty(*key),
            errors: Vec::new(),
        });
    }

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| records.iter().all(|record| !record.contains(column)))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        warn!(
            season = key.season,
            round = key.round,
            session = %key.session_type,
            columns = ?missing,
            "Raw records are missing required columns"
        );
        return Err(ValidationError::MissingColumns { columns: missing });
    }

    let mut rows = Vec::with_capacity(records.len());
    let mut errors = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match RowParser::new(index, record, key.round).parse() {
            Ok(row) => rows.push(row),
            Err(mut row_errors) => errors.append(&mut row_errors),
        }
    }

    let outcome = ValidationOutcome {
        table: ValidatedTable::new(*key, rows),
        errors,
    };
    if outcome.is_clean() {
        debug!(
            season = key.season,
            round = key.round,
            session = %key.session_type,
            rows = outcome.table.len(),
            "Validated raw records"
        );
    } else {
        warn!(
            season = key.season,
            round = key.round,
            session = %key.session_type,
            rows = outcome.table.len(),
            rejected = outcome.rejected_row_count(),
            errors = outcome.errors.len(),
            "Excluded rows that failed validation"
        );
    }
    Ok(outcome)
}

// ============================================================================
// ROW PARSING
// ============================================================================

struct RowParser<'a> {
    row: usize,
    record: &'a RawRecord,
    expected_round: u8,
    errors: Vec<ValidationError>,
}

impl<'a> RowParser<'a> {
    fn new(row: usize, record: &'a RawRecord, expected_round: u8) -> Self {
        Self {
            row,
            record,
            expected_round,
            errors: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<LapRow, Vec<ValidationError>> {
        let driver = self.driver();
        let driver_number = self.driver_number();
        let lap_number = self.positive_int("LapNumber");
        let lap_time = self.lap_time();
        let time = self.duration("Time");
        let stint = self.positive_int("Stint");
        let compound = self.compound();
        let tyre_life = self.positive_int("TyreLife");
        let fresh_tyre = self.boolean("FreshTyre");
        let position = self.position();
        let track_status = self.track_status();
        let is_accurate = self.boolean("IsAccurate");
        let round_number = self.round_number();
        let event_name = self.event_name();

        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        match (
            driver,
            driver_number,
            lap_number,
            lap_time,
            time,
            stint,
            compound,
            tyre_life,
            fresh_tyre,
            position,
            track_status,
            is_accurate,
            round_number,
            event_name,
        ) {
            (
                Some(driver),
                Some(driver_number),
                Some(lap_number),
                Some(lap_time),
                Some(time),
                Some(stint),
                Some(compound),
                Some(tyre_life),
                Some(fresh_tyre),
                Some(position),
                Some(track_status),
                Some(is_accurate),
                Some(round_number),
                Some(event_name),
            ) => Ok(LapRow {
                driver,
                driver_number,
                lap_number,
                lap_time,
                time,
                stint,
                compound,
                tyre_life,
                fresh_tyre,
                position,
                track_status,
                is_accurate,
                round_number,
                event_name,
            }),
            _ => Err(vec![ValidationError::InvalidValue {
                row: self.row,
                field: "*".to_string(),
                reason: "row could not be assembled".to_string(),
            }]),
        }
    }

    fn missing(&mut self, field: &str) {
        self.errors.push(ValidationError::MissingField {
            row: self.row,
            field: field.to_string(),
        });
    }

    fn invalid(&mut self, field: &str, reason: impl Into<String>) {
        self.errors.push(ValidationError::InvalidValue {
            row: self.row,
            field: field.to_string(),
            reason: reason.into(),
        });
    }

    /// Present, possibly null.
    fn present(&mut self, field: &str) -> Option<&'a Value> {
        let value = self.record.get(field);
        if value.is_none() {
            self.missing(field);
        }
        value
    }

    /// Present and non-null.
    fn non_null(&mut self, field: &str) -> Option<&'a Value> {
        match self.present(field)? {
            Value::Null => {
                self.missing(field);
                None
            }
            value => Some(value),
        }
    }

    fn driver(&mut self) -> Option<String> {
        let value = self.non_null("Driver")?;
        let Some(code) = value.as_str().map(str::trim) else {
            self.invalid("Driver", "expected a driver code string");
            return None;
        };
        let len = code.chars().count();
        if !(2..=3).contains(&len) || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            self.invalid("Driver", format!("'{}' is not a 2-3 letter driver code", code));
            return None;
        }
        Some(code.to_ascii_uppercase())
    }

    fn driver_number(&mut self) -> Option<String> {
        let value = self.non_null("DriverNumber")?;
        let number = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(_) => match as_integer(value) {
                Some(n) => n.to_string(),
                None => {
                    self.invalid("DriverNumber", "expected a whole number");
                    return None;
                }
            },
            _ => String::new(),
        };
        if number.is_empty() {
            self.invalid("DriverNumber", "expected a non-empty number or string");
            return None;
        }
        Some(number)
    }

    fn positive_int(&mut self, field: &str) -> Option<u32> {
        let value = self.non_null(field)?;
        match as_integer(value).and_then(|n| u32::try_from(n).ok()) {
            Some(n) if n >= 1 => Some(n),
            _ => {
                self.invalid(field, format!("expected a positive integer, got {}", value));
                None
            }
        }
    }

    fn duration(&mut self, field: &str) -> Option<Option<f64>> {
        let value = self.present(field)?;
        match parse_duration(value) {
            Ok(secs) => Some(secs),
            Err(reason) => {
                self.invalid(field, reason);
                None
            }
        }
    }

    fn lap_time(&mut self) -> Option<Option<f64>> {
        let lap_time = self.duration("LapTime")?;
        if lap_time == Some(0.0) {
            self.invalid("LapTime", "lap time must be positive");
            return None;
        }
        Some(lap_time)
    }

    fn compound(&mut self) -> Option<Compound> {
        let value = self.non_null("Compound")?;
        match value.as_str().map(str::parse::<Compound>) {
            Some(Ok(compound)) => Some(compound),
            Some(Err(e)) => {
                self.invalid("Compound", e.to_string());
                None
            }
            None => {
                self.invalid("Compound", "expected a compound label");
                None
            }
        }
    }

    fn boolean(&mut self, field: &str) -> Option<bool> {
        let value = self.non_null(field)?;
        let parsed = match value {
            Value::Bool(b) => Some(*b),
            Value::Number(_) => match as_integer(value) {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            _ => None,
        };
        if parsed.is_none() {
            self.invalid(field, format!("expected a boolean, got {}", value));
        }
        parsed
    }

    fn position(&mut self) -> Option<Option<u8>> {
        let value = self.present("Position")?;
        if value.is_null() {
            return Some(None);
        }
        match as_integer(value) {
            Some(n @ 1..=MAX_POSITION) => u8::try_from(n).ok().map(Some),
            _ => {
                self.invalid(
                    "Position",
                    format!("expected a position between 1 and {}, got {}", MAX_POSITION, value),
                );
                None
            }
        }
    }

    fn track_status(&mut self) -> Option<TrackStatus> {
        let value = self.non_null("TrackStatus")?;
        let text = match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(_) => as_integer(value).map(|n| n.to_string()),
            _ => None,
        };
        match text.as_deref().and_then(TrackStatus::parse) {
            Some(status) => Some(status),
            None => {
                self.invalid("TrackStatus", format!("expected status digits, got {}", value));
                None
            }
        }
    }

    fn round_number(&mut self) -> Option<u8> {
        let value = self.non_null("RoundNumber")?;
        let Some(round) = as_integer(value).filter(|n| *n >= 1) else {
            self.invalid("RoundNumber", format!("expected a positive integer, got {}", value));
            return None;
        };
        if round != u64::from(self.expected_round) {
            self.errors.push(ValidationError::RoundMismatch {
                row: self.row,
                expected: self.expected_round,
                found: round,
            });
            return None;
        }
        Some(self.expected_round)
    }

    fn event_name(&mut self) -> Option<String> {
        let value = self.non_null("EventName")?;
        match value.as_str().map(str::trim) {
            Some(name) if !name.is_empty() => Some(name.to_string()),
            _ => {
                self.invalid("EventName", "expected a non-empty event name");
                None
            }
        }
    }
}

/// Whole, non-negative numbers, including floats with no fractional part.
fn as_integer(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}
