//! In-process backend on top of moka.
//!
//! moka evicts entries on its own once their TTL passes or the byte budget
//! is exhausted; the lazy check in [`super::Cache::get`] keeps reads correct
//! even before that housekeeping has run.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::{future::Cache as MokaCache, Expiry};
use tracing::debug;

use super::{
    backend::{CacheBackend, CacheEntry, CacheError},
    CacheKey,
};

struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl())
    }
}

pub struct MemoryBackend {
    entries: MokaCache<String, CacheEntry>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.entries.entry_count())
            .field("weighted_size", &self.entries.weighted_size())
            .finish()
    }
}

impl MemoryBackend {
    pub fn new(max_capacity_mb: u64) -> Self {
        let max_capacity_bytes = max_capacity_mb.max(1) * 1024 * 1024;
        let entries = MokaCache::builder()
            .max_capacity(max_capacity_bytes)
            .weigher(|key: &String, value: &CacheEntry| -> u32 {
                (key.len() + value.weight()).try_into().unwrap_or(u32::MAX)
            })
            .expire_after(EntryExpiry)
            .build();
        Self { entries }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(&key.to_string()).await)
    }

    async fn put_entry(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn expire(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.entries.invalidate(&key.to_string()).await;
        Ok(())
    }

    async fn sweep(&self) -> Result<(), CacheError> {
        self.entries.run_pending_tasks().await;
        debug!(
            target: "cache",
            entries = self.entries.entry_count(),
            bytes = self.entries.weighted_size(),
            "memory cache swept"
        );
        Ok(())
    }
}
