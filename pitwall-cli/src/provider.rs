//! File-backed session provider.
//!
//! Reads `<data_dir>/<season>/<round>_<R|S>.json`, each holding a JSON array
//! of raw lap records as exported from the timing service.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pitwall_core::{FetchError, PitwallResult, RawRecord, SessionKey, SessionProvider};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct JsonDirProvider {
    data_dir: PathBuf,
}

impl JsonDirProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// File a session is read from.
    pub fn session_path(&self, key: &SessionKey) -> PathBuf {
        self.data_dir
            .join(key.season.to_string())
            .join(format!("{}_{}.json", key.round, key.session_type.code()))
    }
}

#[async_trait]
impl SessionProvider for JsonDirProvider {
    async fn fetch_session(&self, key: &SessionKey) -> PitwallResult<Vec<RawRecord>> {
        let path = self.session_path(key);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::NotFound => format!("{} does not exist", path.display()),
                _ => format!("{}: {}", path.display(), e),
            };
            FetchError::Unavailable { key: *key, reason }
        })?;

        let records: Vec<RawRecord> =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Unavailable {
                key: *key,
                reason: format!("{} is not a JSON array of records: {}", path.display(), e),
            })?;

        debug!(
            season = key.season,
            round = key.round,
            session = %key.session_type,
            rows = records.len(),
            path = %path.display(),
            "Read session file"
        );
        Ok(records)
    }
}
