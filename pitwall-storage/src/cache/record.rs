//! On-disk record layout for durable cache entries.
//!
//! ```text
//! [magic "PWT1": 4][fetched_at ms: i64 LE][ttl_expiry ms: i64 LE]
//! [payload len: u32 LE][sha256(payload): 32][payload: JSON EnrichedTable]
//! ```
//!
//! Every field is checked on decode. A record that is truncated, carries the
//! wrong magic, disagrees with its own length, or fails its checksum is
//! rejected as a whole.

use chrono::{DateTime, Utc};
use pitwall_core::{CacheEntry, EnrichedTable, SessionKey};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const MAGIC: &[u8; 4] = b"PWT1";
pub const HEADER_LEN: usize = 4 + 8 + 8 + 4 + 32;

/// Why a stored record could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record is {0} bytes, shorter than its header")]
    Truncated(usize),

    #[error("unknown record magic")]
    BadMagic,

    #[error("payload length {declared} does not match {actual} stored bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload checksum mismatch")]
    ChecksumMismatch,

    #[error("timestamp {0} ms is out of range")]
    BadTimestamp(i64),

    #[error("payload belongs to {found}, not {expected}")]
    KeyMismatch {
        expected: SessionKey,
        found: SessionKey,
    },

    #[error("payload encoding: {0}")]
    Payload(String),
}

/// Serialise `entry` into a self-checking record.
pub fn encode(entry: &CacheEntry) -> Result<Vec<u8>, RecordError> {
    let payload =
        serde_json::to_vec(entry.table.as_ref()).map_err(|e| RecordError::Payload(e.to_string()))?;
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| RecordError::Payload("payload exceeds 4 GiB".into()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&entry.fetched_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&entry.ttl_expiry.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&payload_len.to_le_bytes());
    bytes.extend_from_slice(&Sha256::digest(&payload));
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a record stored under `key`.
pub fn decode(key: &SessionKey, bytes: &[u8]) -> Result<CacheEntry, RecordError> {
    if bytes.len() < HEADER_LEN {
        return Err(RecordError::Truncated(bytes.len()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(RecordError::BadMagic);
    }

    let fetched_at = timestamp(&bytes[4..12])?;
    let ttl_expiry = timestamp(&bytes[12..20])?;
    let declared = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]) as usize;
    let checksum = &bytes[24..HEADER_LEN];
    let payload = &bytes[HEADER_LEN..];

    if payload.len() != declared {
        return Err(RecordError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    if Sha256::digest(payload).as_slice() != checksum {
        return Err(RecordError::ChecksumMismatch);
    }

    let table: EnrichedTable =
        serde_json::from_slice(payload).map_err(|e| RecordError::Payload(e.to_string()))?;
    if table.key != *key {
        return Err(RecordError::KeyMismatch {
            expected: *key,
            found: table.key,
        });
    }

    Ok(CacheEntry::new(*key, Arc::new(table), fetched_at, ttl_expiry))
}

fn timestamp(bytes: &[u8]) -> Result<DateTime<Utc>, RecordError> {
    let mut millis = [0u8; 8];
    millis.copy_from_slice(bytes);
    let millis = i64::from_le_bytes(millis);
    DateTime::from_timestamp_millis(millis).ok_or(RecordError::BadTimestamp(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pitwall_test_utils::fixtures::{cache_entry, enriched_table, RACE_2024_R05, SPRINT_2024_R05};

    fn entry() -> CacheEntry {
        let fetched_at = DateTime::from_timestamp_millis(1_715_000_000_123).unwrap();
        cache_entry(enriched_table(RACE_2024_R05, 4), fetched_at, Duration::hours(24))
    }

    #[test]
    fn test_decode_restores_entry() {
        let bytes = encode(&entry()).unwrap();
        assert_eq!(&bytes[0..4], MAGIC);
        assert_eq!(decode(&RACE_2024_R05, &bytes).unwrap(), entry());
    }

    #[test]
    fn test_truncated_record() {
        let bytes = encode(&entry()).unwrap();
        assert_eq!(
            decode(&RACE_2024_R05, &bytes[..10]),
            Err(RecordError::Truncated(10))
        );
        let cut = bytes.len() - 5;
        assert!(matches!(
            decode(&RACE_2024_R05, &bytes[..cut]),
            Err(RecordError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_flipped_payload_byte_fails_checksum() {
        let mut bytes = encode(&entry()).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x01;
        assert_eq!(
            decode(&RACE_2024_R05, &bytes),
            Err(RecordError::ChecksumMismatch)
        );
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode(&entry()).unwrap();
        bytes[0] = b'X';
        assert_eq!(decode(&RACE_2024_R05, &bytes), Err(RecordError::BadMagic));
    }

    #[test]
    fn test_record_under_wrong_key() {
        let bytes = encode(&entry()).unwrap();
        assert!(matches!(
            decode(&SPRINT_2024_R05, &bytes),
            Err(RecordError::KeyMismatch { .. })
        ));
    }
}
