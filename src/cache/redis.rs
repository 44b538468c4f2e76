//! Redis-backed store shared between service instances.

use std::{sync::RwLock, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use tracing::info;

use super::error::CacheError;
use super::lock::{rw_read, rw_write};
use super::store::CacheStore;

const SOURCE: &str = "cache::redis";
const SCAN_BATCH: usize = 200;

pub struct RedisStore {
    connection: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Connect and PING within `timeout`. Any failure is reported so the caller
    /// can fall back to the in-process store.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;

        let mut manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(timeout))??;

        let pong: String = tokio::time::timeout(
            timeout,
            redis::cmd("PING").query_async(&mut manager),
        )
        .await
        .map_err(|_| CacheError::Timeout(timeout))??;

        info!(target = SOURCE, reply = %pong, "Connected to redis cache");

        Ok(Self {
            connection: RwLock::new(Some(manager)),
        })
    }

    fn connection(&self) -> Result<ConnectionManager, CacheError> {
        rw_read(&self.connection, SOURCE, "connection")
            .clone()
            .ok_or(CacheError::Closed)
    }
}

/// Escape glob metacharacters so a literal prefix can be used in `SCAN MATCH`.
fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl CacheStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.connection()?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let seconds = ttl.as_secs().max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(&value[..])
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    // Walks the keyspace with SCAN in batches.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection()?;
        let pattern = match_pattern(prefix);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.delete_by_prefix(super::keys::NAMESPACE).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), CacheError> {
        // Dropping the manager closes the multiplexed connection.
        rw_write(&self.connection, SOURCE, "close").take();
        Ok(())
    }
}
