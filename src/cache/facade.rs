//! Process-wide cache handle with backend fallback.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, error, warn};

use super::config::{CacheBackend, CacheConfig};
use super::error::CacheError;
use super::keys::{NAMESPACE, scope_of};
use super::redis::RedisStore;
use super::store::{CacheStore, MemoryStore};

const SOURCE: &str = "cache::facade";

const METRIC_CACHE_HIT: &str = "rolodex_cache_hit_total";
const METRIC_CACHE_MISS: &str = "rolodex_cache_miss_total";
const METRIC_CACHE_DEGRADED: &str = "rolodex_cache_degraded_total";

/// Cache used by the read and write paths.
///
/// Errors never escape. A primary backend that fails or does not answer
/// within the operation timeout is logged, the handle flips to the in-process
/// store permanently, and the operation is retried there.
pub struct Cache {
    primary: Option<Arc<dyn CacheStore>>,
    fallback: MemoryStore,
    degraded: AtomicBool,
    op_timeout: Duration,
}

impl Cache {
    /// In-process only.
    pub fn memory(config: &CacheConfig) -> Self {
        Self {
            primary: None,
            fallback: MemoryStore::new(config),
            degraded: AtomicBool::new(false),
            op_timeout: config.connect_timeout(),
        }
    }

    /// Use `primary` until it fails, then the in-process store.
    pub fn with_primary(primary: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            primary: Some(primary),
            fallback: MemoryStore::new(config),
            degraded: AtomicBool::new(false),
            op_timeout: config.connect_timeout(),
        }
    }

    /// Build the cache selected by configuration. An unreachable Redis at
    /// startup yields an in-process cache rather than an error.
    pub async fn connect(config: &CacheConfig) -> Self {
        match config.backend {
            CacheBackend::Memory => Self::memory(config),
            CacheBackend::Redis => match Self::connect_redis(config).await {
                Ok(store) => Self::with_primary(Arc::new(store), config),
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        error = %err,
                        "Redis cache unavailable at startup, using in-process cache"
                    );
                    counter!(METRIC_CACHE_DEGRADED, "op" => "connect").increment(1);
                    Self::memory(config)
                }
            },
        }
    }

    async fn connect_redis(config: &CacheConfig) -> Result<RedisStore, CacheError> {
        let url = config.redis_url.as_deref().ok_or_else(|| {
            CacheError::Configuration("cache.redis_url is required for the redis backend".into())
        })?;
        RedisStore::connect(url, config.connect_timeout()).await
    }

    /// Name of the backend currently serving requests.
    pub fn backend(&self) -> &'static str {
        match self.active_primary() {
            Some(primary) => primary.backend(),
            None => self.fallback.backend(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn active_primary(&self) -> Option<&Arc<dyn CacheStore>> {
        if self.is_degraded() {
            return None;
        }
        self.primary.as_ref()
    }

    fn degrade(&self, op: &'static str, err: &CacheError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            error!(
                target = SOURCE,
                op,
                error = %err,
                "Cache backend failed, switching to in-process cache for the rest of the process"
            );
            counter!(METRIC_CACHE_DEGRADED, "op" => op).increment(1);
        }
    }

    /// Run a primary-backend call, treating a stalled backend as a failure.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.op_timeout, call)
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))?
    }

    fn namespaced(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let full_key = Self::namespaced(key);

        let value = match self.active_primary() {
            Some(primary) => match self.bounded(primary.get(&full_key)).await {
                Ok(value) => value,
                Err(err) => {
                    self.degrade("get", &err);
                    self.fallback_get(&full_key).await
                }
            },
            None => self.fallback_get(&full_key).await,
        };

        let scope = scope_of(key).to_string();
        if value.is_some() {
            counter!(METRIC_CACHE_HIT, "scope" => scope).increment(1);
        } else {
            counter!(METRIC_CACHE_MISS, "scope" => scope).increment(1);
        }
        value
    }

    async fn fallback_get(&self, full_key: &str) -> Option<Bytes> {
        match self.fallback.get(full_key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(target = SOURCE, key = full_key, error = %err, "In-process cache read failed");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        let full_key = Self::namespaced(key);

        if let Some(primary) = self.active_primary() {
            match self.bounded(primary.set(&full_key, value.clone(), ttl)).await {
                Ok(()) => return,
                Err(err) => self.degrade("set", &err),
            }
        }

        if let Err(err) = self.fallback.set(&full_key, value, ttl).await {
            warn!(target = SOURCE, key = %full_key, error = %err, "In-process cache write failed");
        }
    }

    /// Remove all entries under `prefix`. The in-process store is always swept
    /// too, so nothing written before a degradation can resurface.
    pub async fn delete_by_prefix(&self, prefix: &str) {
        let full_prefix = Self::namespaced(prefix);

        if let Some(primary) = self.active_primary() {
            match self.bounded(primary.delete_by_prefix(&full_prefix)).await {
                Ok(removed) => {
                    debug!(target = SOURCE, prefix = %full_prefix, removed, "Invalidated cache prefix");
                }
                Err(err) => self.degrade("delete_by_prefix", &err),
            }
        }

        if let Err(err) = self.fallback.delete_by_prefix(&full_prefix).await {
            warn!(target = SOURCE, prefix = %full_prefix, error = %err, "In-process cache invalidation failed");
        }
    }

    pub async fn clear(&self) {
        if let Some(primary) = self.active_primary()
            && let Err(err) = self.bounded(primary.clear()).await
        {
            self.degrade("clear", &err);
        }
        if let Err(err) = self.fallback.clear().await {
            warn!(target = SOURCE, error = %err, "In-process cache clear failed");
        }
    }

    /// Release backend connections. Called once during shutdown.
    pub async fn close(&self) {
        if let Some(primary) = self.primary.as_ref()
            && let Err(err) = self.bounded(primary.close()).await
        {
            warn!(target = SOURCE, error = %err, "Cache backend did not close cleanly");
        }
        if let Err(err) = self.fallback.close().await {
            warn!(target = SOURCE, error = %err, "In-process cache did not close cleanly");
        }
    }

    /// Read and deserialize a JSON value. Undecodable entries count as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(target = SOURCE, key, error = %err, "Discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, Bytes::from(bytes), ttl).await,
            Err(err) => {
                warn!(target = SOURCE, key, error = %err, "Skipping cache write for unserializable value");
            }
        }
    }
}
