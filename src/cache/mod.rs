//! Contact cache.
//!
//! A small key/value layer with TTL and prefix invalidation. Two backends sit
//! behind [`CacheStore`]: an in-process LRU and Redis. [`Cache`] picks one at
//! startup and falls back to the in-process store for the rest of the process
//! lifetime as soon as Redis misbehaves.
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! list_ttl_seconds = 300
//! ```

mod config;
mod error;
mod facade;
mod keys;
mod lock;
mod redis;
mod store;

pub use config::{CacheBackend, CacheConfig};
pub use error::CacheError;
pub use facade::Cache;
pub use keys::{
    CONTACT_PREFIX, IDEMPOTENCY_PREFIX, LIST_PREFIX, NAMESPACE, contact_key, idempotency_key,
    list_key,
};
pub use redis::RedisStore;
pub use store::{CacheStore, MemoryStore};
