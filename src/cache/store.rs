//! Cache storage contract and the in-process implementation.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;

use super::config::CacheConfig;
use super::error::CacheError;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

/// Key/value store with per-entry TTL and prefix deletion.
///
/// Implementations must be safe to share across tasks without external
/// locking. Concurrent writers to one key race and the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Remove every entry whose key starts with `prefix`. Returns how many were removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn close(&self) -> Result<(), CacheError>;
}

struct MemoryEntry {
    value: Bytes,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// In-process store. Expiry is checked on read; the LRU bound caps memory.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.memory_entry_limit_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");

        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now().checked_add(ttl);
        mutex_lock(&self.entries, SOURCE, "set")
            .put(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "delete_by_prefix");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.pop(key.as_str());
        }
        Ok(doomed.len() as u64)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.clear().await
    }
}
