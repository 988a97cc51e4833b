//! Content-addressed memoization shared by OCR, page fetches and LLM calls.
//!
//! Keys are a [`Namespace`] plus a blake3 [`Fingerprint`] of canonicalized
//! input. A broken or disabled backend never fails a caller: it only turns
//! every lookup into a miss.

mod backend;
mod memory;

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::config::{CacheBackendKind, CacheConfig};

pub use backend::{CacheBackend, CacheEntry, CacheError, DisabledBackend};
pub use memory::MemoryBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Ocr,
    Url,
    Llm,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Url => "url",
            Self::Llm => "llm",
        }
    }
}

/// Deterministic blake3 digest of canonicalized input parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn of(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn of_str(value: &str) -> Self {
        Self::of(&[value.as_bytes()])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: Namespace,
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    pub fn new(namespace: Namespace, fingerprint: &Fingerprint) -> Self {
        Self {
            namespace,
            fingerprint: fingerprint.clone(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace.as_str(), self.fingerprint.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Copy)]
struct NamespaceTtls {
    ocr: Duration,
    url: Duration,
    llm: Duration,
}

impl NamespaceTtls {
    fn for_namespace(&self, namespace: Namespace) -> Duration {
        match namespace {
            Namespace::Ocr => self.ocr,
            Namespace::Url => self.url,
            Namespace::Llm => self.llm,
        }
    }
}

/// Typed facade over a [`CacheBackend`]. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    ttls: NamespaceTtls,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend.name())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            ttls: NamespaceTtls {
                ocr: config.ocr_ttl,
                url: config.url_ttl,
                llm: config.llm_ttl,
            },
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new(config.max_capacity_mb)),
            CacheBackendKind::Disabled => Arc::new(DisabledBackend),
        };
        Self::new(backend, config)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn ttl(&self, namespace: Namespace) -> Duration {
        self.ttls.for_namespace(namespace)
    }

    /// Returns the live value for the key, or `None` on a miss, an expired
    /// entry, a backend failure or a payload that no longer decodes.
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        fingerprint: &Fingerprint,
    ) -> Option<T> {
        let key = CacheKey::new(namespace, fingerprint);
        let entry = match self.backend.get_entry(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return self.miss(&key),
            Err(err) => {
                warn!(target: "cache", key = %key, error = %err, "cache read failed; treating as miss");
                return self.miss(&key);
            }
        };

        if entry.is_expired() {
            debug!(target: "cache", key = %key, "cache entry expired");
            if let Err(err) = self.backend.expire(&key).await {
                debug!(target: "cache", key = %key, error = %err, "failed to drop expired entry");
            }
            return self.miss(&key);
        }

        match serde_json::from_slice::<T>(entry.payload()) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(target: "cache", key = %key, "cache hit");
                Some(value)
            }
            Err(err) => {
                warn!(target: "cache", key = %key, error = %err, "cached payload did not decode");
                self.miss(&key)
            }
        }
    }

    pub async fn put<T: Serialize>(&self, namespace: Namespace, fingerprint: &Fingerprint, value: &T) {
        self.put_with_ttl(namespace, fingerprint, value, self.ttl(namespace))
            .await;
    }

    /// Last write wins. Failures are logged and otherwise ignored.
    pub async fn put_with_ttl<T: Serialize>(
        &self,
        namespace: Namespace,
        fingerprint: &Fingerprint,
        value: &T,
        ttl: Duration,
    ) {
        let key = CacheKey::new(namespace, fingerprint);
        let result = match serde_json::to_vec(value) {
            Ok(payload) => self.backend.put_entry(&key, CacheEntry::new(payload, ttl)).await,
            Err(err) => Err(CacheError::from(err)),
        };
        match result {
            Ok(()) => debug!(target: "cache", key = %key, ttl_secs = ttl.as_secs(), "cache write"),
            Err(err) => warn!(target: "cache", key = %key, error = %err, "cache write skipped"),
        }
    }

    pub async fn expire(&self, namespace: Namespace, fingerprint: &Fingerprint) {
        let key = CacheKey::new(namespace, fingerprint);
        if let Err(err) = self.backend.expire(&key).await {
            warn!(target: "cache", key = %key, error = %err, "cache expire failed");
        }
    }

    pub async fn sweep(&self) {
        if let Err(err) = self.backend.sweep().await {
            warn!(target: "cache", error = %err, "cache sweep failed");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn miss<T>(&self, key: &CacheKey) -> Option<T> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(target: "cache", key = %key, "cache miss");
        None
    }
}
