//! Key-value store port and the in-process implementation.
//!
//! The resolver and coordinator only see [`KvStore`]. Production deployments
//! use Redis (`infra::redis`); [`MemoryKvStore`] backs single-node setups
//! without a Redis URL and the test suite.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tokio::time::Instant;

use super::config::CacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";
const METRIC_CACHE_EVICT_TOTAL: &str = "transit_cache_evict_total";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key-value store timed out")]
    Timeout,
    #[error("key-value store protocol error: {0}")]
    Protocol(String),
}

/// Minimal key-value contract the cache layer relies on.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), KvError>;

    /// Remove `key`. Returns whether a live entry was removed; absent keys are
    /// not an error.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Every live key starting with `prefix`.
    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    /// Remaining lifetime of `key`, `None` when absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;

    async fn health_check(&self) -> Result<(), KvError>;

    /// Short backend name for logs and the admin surface.
    fn backend(&self) -> &'static str;
}

/// Run a store call under `limit`, mapping an elapsed deadline to [`KvError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, KvError>
where
    F: Future<Output = Result<T, KvError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(KvError::Timeout))
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Bounded in-process store with LRU eviction and lazy expiry.
pub struct MemoryKvStore {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryKvStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    /// Number of stored entries, expired ones included until touched.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_entry(&self, key: &str, op: &'static str) -> Option<MemoryEntry> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, op);
        match entries.get(key).cloned() {
            Some(entry) if entry.is_live(now) => Some(entry),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        Ok(self.live_entry(key, "get").map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), KvError> {
        let entry = MemoryEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let displaced = mutex_lock(&self.entries, SOURCE, "set").push(key.to_string(), entry);
        if let Some((displaced_key, _)) = displaced
            && displaced_key != key
        {
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let now = Instant::now();
        let removed = mutex_lock(&self.entries, SOURCE, "delete").pop(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.live_entry(key, "exists").is_some())
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "keys_by_prefix");

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }

        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let now = Instant::now();
        Ok(self
            .live_entry(key, "ttl")
            .map(|entry| entry.expires_at.saturating_duration_since(now)))
    }

    async fn health_check(&self) -> Result<(), KvError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
