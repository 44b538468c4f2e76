//! Cache configuration.

use std::{num::NonZeroUsize, time::Duration};

use serde::Deserialize;

const DEFAULT_LIST_TTL_SECONDS: u64 = 300;
const DEFAULT_IDEMPOTENCY_TTL_SECONDS: u64 = 86_400;
const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 10_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

impl CacheBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheBackend::Memory => "memory",
            CacheBackend::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Required when `backend = "redis"`.
    pub redis_url: Option<String>,
    /// TTL for list envelopes and single-contact snapshots.
    pub list_ttl_seconds: u64,
    /// TTL for recorded idempotent responses.
    pub idempotency_ttl_seconds: u64,
    /// Maximum entries held by the in-process store before LRU eviction.
    pub memory_entry_limit: usize,
    /// Upper bound on the Redis connect and PING, and on every later Redis call.
    pub connect_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            list_ttl_seconds: DEFAULT_LIST_TTL_SECONDS,
            idempotency_ttl_seconds: DEFAULT_IDEMPOTENCY_TTL_SECONDS,
            memory_entry_limit: DEFAULT_MEMORY_ENTRY_LIMIT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            redis_url: settings.redis_url.clone(),
            list_ttl_seconds: settings.list_ttl_seconds.get(),
            idempotency_ttl_seconds: settings.idempotency_ttl_seconds.get(),
            memory_entry_limit: settings.memory_entry_limit.get(),
            connect_timeout_ms: settings.connect_timeout_ms.get(),
        }
    }
}

impl CacheConfig {
    pub fn list_ttl(&self) -> Duration {
        Duration::from_secs(self.list_ttl_seconds)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the memory entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_entry_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
