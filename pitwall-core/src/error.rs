//! Error types for pitwall operations

use crate::SessionKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Failed to encode entry for {key}: {reason}")]
    EncodeFailed { key: SessionKey, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
///
/// Row-level variants are collected and reported alongside the table; only
/// `MissingColumns` aborts a batch.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Row {row}: required field missing: {field}")]
    MissingField { row: usize, field: String },

    #[error("Row {row}: invalid value for {field}: {reason}")]
    InvalidValue {
        row: usize,
        field: String,
        reason: String,
    },

    #[error("Row {row}: belongs to round {found}, expected round {expected}")]
    RoundMismatch { row: usize, expected: u8, found: u64 },

    #[error("Required columns missing from every record: {columns:?}")]
    MissingColumns { columns: Vec<String> },
}

impl ValidationError {
    /// Row index for row-level errors.
    pub fn row(&self) -> Option<usize> {
        match self {
            ValidationError::MissingField { row, .. }
            | ValidationError::InvalidValue { row, .. }
            | ValidationError::RoundMismatch { row, .. } => Some(*row),
            ValidationError::MissingColumns { .. } => None,
        }
    }

    /// Column name the error refers to, if it names exactly one.
    pub fn column(&self) -> Option<&str> {
        match self {
            ValidationError::MissingField { field, .. }
            | ValidationError::InvalidValue { field, .. } => Some(field),
            ValidationError::RoundMismatch { .. } => Some("RoundNumber"),
            ValidationError::MissingColumns { .. } => None,
        }
    }

    /// True when the error invalidates the whole batch.
    pub fn is_structural(&self) -> bool {
        matches!(self, ValidationError::MissingColumns { .. })
    }
}

/// Upstream fetch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Provider unavailable for {key}: {reason}")]
    Unavailable { key: SessionKey, reason: String },

    #[error("Fetch for {key} timed out after {timeout:?}")]
    Timeout { key: SessionKey, timeout: Duration },

    #[error("In-flight fetch for {key} ended without a result")]
    Aborted { key: SessionKey },

    #[error("Provider returned structurally invalid data for {key}: {source}")]
    Schema {
        key: SessionKey,
        #[source]
        source: ValidationError,
    },
}

impl FetchError {
    /// Failures a stale entry may stand in for.
    pub fn allows_stale_fallback(&self) -> bool {
        !matches!(self, FetchError::Schema { .. })
    }
}

/// Transformation pipeline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Step {step} reads column {column} before it is produced")]
    MissingInput { step: String, column: String },

    #[error("Step {step} writes column {column} that is already present")]
    DuplicateOutput { step: String, column: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Master error type for all pitwall errors.
#[derive(Debug, Clone, Error)]
pub enum PitwallError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl PitwallError {
    /// Whether a stale cache entry may be served in place of this failure.
    ///
    /// Availability problems fall back; data that is structurally wrong or a
    /// broken pipeline does not.
    pub fn allows_stale_fallback(&self) -> bool {
        match self {
            PitwallError::Fetch(e) => e.allows_stale_fallback(),
            PitwallError::Storage(_) => true,
            PitwallError::Validation(_) | PitwallError::Pipeline(_) | PitwallError::Config(_) => {
                false
            }
        }
    }
}

/// Result type alias for pitwall operations.
pub type PitwallResult<T> = Result<T, PitwallError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionType;

    fn key() -> SessionKey {
        SessionKey::new(2024, 5, SessionType::Race)
    }

    #[test]
    fn test_validation_error_display_invalid_value() {
        let err = ValidationError::InvalidValue {
            row: 3,
            field: "LapTime".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Row 3"));
        assert!(msg.contains("LapTime"));
        assert!(msg.contains("must be positive"));
        assert_eq!(err.row(), Some(3));
        assert_eq!(err.column(), Some("LapTime"));
        assert!(!err.is_structural());
    }

    #[test]
    fn test_missing_columns_is_structural() {
        let err = ValidationError::MissingColumns {
            columns: vec!["Compound".to_string()],
        };
        assert!(err.is_structural());
        assert_eq!(err.row(), None);
        assert!(format!("{}", err).contains("Compound"));
    }

    #[test]
    fn test_fetch_error_display_timeout() {
        let err = FetchError::Timeout {
            key: key(),
            timeout: Duration::from_secs(30),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("2024-R05-Race"));
    }

    #[test]
    fn test_schema_failures_do_not_fall_back() {
        let schema = FetchError::Schema {
            key: key(),
            source: ValidationError::MissingColumns { columns: vec![] },
        };
        assert!(!schema.allows_stale_fallback());
        let unavailable = FetchError::Unavailable {
            key: key(),
            reason: "503".to_string(),
        };
        assert!(unavailable.allows_stale_fallback());
    }

    #[test]
    fn test_pitwall_error_from_storage() {
        let err: PitwallError = StorageError::LockPoisoned.into();
        assert!(format!("{}", err).contains("Storage error"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "memory_capacity".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("memory_capacity"));
        assert!(msg.contains("must be positive"));
    }
}
