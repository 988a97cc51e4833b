use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use thiserror::Error;

use super::CacheKey;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache payload could not be encoded: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A stored value together with the moment it was written and how long it
/// stays valid. Expiry is checked when the entry is read.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    payload: Arc<[u8]>,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    pub fn new(payload: Vec<u8>, ttl: Duration) -> Self {
        Self::inserted_at(payload, ttl, Instant::now())
    }

    pub fn inserted_at(payload: Vec<u8>, ttl: Duration, inserted_at: Instant) -> Self {
        Self {
            payload: payload.into(),
            inserted_at,
            ttl,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub(crate) fn weight(&self) -> usize {
        self.payload.len()
    }
}

/// Storage behind [`super::Cache`]. Implementations must allow concurrent
/// access to distinct keys without a global lock.
#[async_trait]
pub trait CacheBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn get_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    async fn put_entry(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError>;

    async fn expire(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Releases memory held by expired entries.
    async fn sweep(&self) -> Result<(), CacheError>;
}

/// A backend that is never reachable; every lookup is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBackend;

#[async_trait]
impl CacheBackend for DisabledBackend {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn get_entry(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Err(CacheError::Unavailable("caching is disabled".into()))
    }

    async fn put_entry(&self, _key: &CacheKey, _entry: CacheEntry) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("caching is disabled".into()))
    }

    async fn expire(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Ok(())
    }

    async fn sweep(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_expires_exactly_at_ttl() {
        let start = Instant::now();
        let entry = CacheEntry::inserted_at(b"v".to_vec(), Duration::from_secs(10), start);
        assert!(!entry.is_expired_at(start));
        assert!(!entry.is_expired_at(start + Duration::from_secs(9)));
        assert!(entry.is_expired_at(start + Duration::from_secs(10)));
    }

    #[test]
    fn zero_ttl_is_immediately_expired() {
        let entry = CacheEntry::new(b"v".to_vec(), Duration::ZERO);
        assert!(entry.is_expired());
    }
}
