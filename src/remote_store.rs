//! Shared cache tier
//!
//! Values travel as JSON so any instance can read what another wrote. Redis
//! keys are namespaced by region: `{prefix}{region}::{key}`, e.g.
//! `weather:weather-current::Lisbon-current-OPENWEATHERMAP-en`.

use std::{collections::BTreeMap, future::Future, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult, aio::ConnectionManager};
use tracing::{debug, warn};

use crate::{
    CacheConfig, StoreError,
    key::{CacheKey, Document, Region},
    stats::parse_info,
};

/// Cross-instance key/value store.
///
/// Every call may fail with a [`StoreError`]; callers decide how to degrade.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn get(&self, key: &CacheKey) -> Result<Option<Document>, StoreError>;

    async fn put(&self, key: &CacheKey, value: &Document, ttl: Duration)
    -> Result<(), StoreError>;

    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError>;

    async fn clear_region(&self, region: Region) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError> {
        for region in Region::ALL {
            self.clear_region(region).await?;
        }
        Ok(())
    }

    /// Raw server information, as key/value pairs
    async fn info(&self) -> Result<BTreeMap<String, String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

const SCAN_BATCH: usize = 500;

/// Expiry for `PSETEX`, rounded up to whole milliseconds so the stored TTL is
/// never shorter than requested. `PSETEX` rejects zero.
fn expiry_millis(ttl: Duration) -> u64 {
    let mut millis = ttl.as_millis();
    if ttl.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}

/// Redis-backed [`RemoteStore`]
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    key_prefix: String,
    timeout: Duration,
}

impl RedisStore {
    pub async fn connect(
        redis_client: redis::Client,
        config: &CacheConfig,
    ) -> Result<Self, StoreError> {
        let timeout = config.remote_timeout;
        let redis = tokio::time::timeout(timeout, ConnectionManager::new(redis_client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;

        Ok(Self {
            redis,
            key_prefix: config.remote_key_prefix.clone(),
            timeout,
        })
    }

    fn redis_key(&self, key: &CacheKey) -> String {
        format!("{}{}::{}", self.key_prefix, key.region().name(), key)
    }

    fn region_pattern(&self, region: Region) -> String {
        format!("{}{}::*", self.key_prefix, region.name())
    }

    /// Run one Redis command, bounded by the configured timeout.
    async fn bounded<T>(&self, command: impl Future<Output = RedisResult<T>>) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, command).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Document>, StoreError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.redis.clone();

        let cached: Option<String> = self.bounded(conn.get(&redis_key)).await?;
        let Some(json) = cached else {
            return Ok(None);
        };

        match serde_json::from_str::<Document>(&json) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    "Failed to deserialize remote value for key {}: {}. Deleting corrupt entry.",
                    key, e
                );
                if let Err(del_err) = self.bounded(conn.del::<_, ()>(&redis_key)).await {
                    warn!(
                        "Failed to delete corrupt remote entry {}: {}",
                        redis_key, del_err
                    );
                }
                Err(StoreError::Serialization(e))
            }
        }
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: &Document,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.redis.clone();
        self.bounded(conn.pset_ex::<_, _, ()>(
            self.redis_key(key),
            json,
            expiry_millis(ttl),
        ))
        .await
    }

    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        self.bounded(conn.del::<_, ()>(self.redis_key(key))).await
    }

    async fn clear_region(&self, region: Region) -> Result<(), StoreError> {
        let pattern = self.region_pattern(region);
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                deleted += keys.len();
                self.bounded(conn.del::<_, ()>(keys)).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Cleared {} remote entries from region {}", deleted, region);
        Ok(())
    }

    async fn info(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let mut conn = self.redis.clone();
        let raw: String = self
            .bounded(redis::cmd("INFO").query_async(&mut conn))
            .await?;
        Ok(parse_info(&raw))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        self.bounded(redis::cmd("PING").query_async::<String>(&mut conn))
            .await
            .map(|_| ())
    }
}
