//! Upstream timing-data provider.

use crate::{PitwallResult, RawRecord, SessionKey};
use async_trait::async_trait;
use std::sync::Arc;

/// Source of raw lap records for one session.
///
/// Implementations adapt a concrete timing service or file layout. They may
/// be slow or fail; callers bound them with a timeout and never retry inline.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Fetch every raw lap record of the session identified by `key`.
    ///
    /// Availability failures should be reported as
    /// [`crate::FetchError::Unavailable`].
    async fn fetch_session(&self, key: &SessionKey) -> PitwallResult<Vec<RawRecord>>;
}

#[async_trait]
impl<P: SessionProvider + ?Sized> SessionProvider for Arc<P> {
    async fn fetch_session(&self, key: &SessionKey) -> PitwallResult<Vec<RawRecord>> {
        (**self).fetch_session(key).await
    }
}
