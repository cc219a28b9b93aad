//! Redis result cache.
//!
//! Entries are stored as JSON strings under `{prefix}:{content_hash}` with `SET .. EX`.
//! Every command is bounded by the configured operation timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::debug;

use docuquery_core::config::CacheConfig;
use docuquery_core::error::{CacheError, CacheResult};
use docuquery_core::traits::ResultCache;

/// How long to wait for the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed [`ResultCache`].
///
/// The connection manager reconnects on its own after the server goes away; commands
/// issued while disconnected fail and are absorbed by the cache layer.
#[derive(Clone)]
pub struct RedisResultCache {
    connection: ConnectionManager,
    key_prefix: String,
    timeout: Duration,
}

impl std::fmt::Debug for RedisResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisResultCache")
            .field("key_prefix", &self.key_prefix)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisResultCache {
    /// Connect to the Redis server at `config.url`.
    pub async fn new(config: &CacheConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::Unavailable(format!("Failed to create Redis client: {e}")))?;

        let connection = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Unavailable("Timed out connecting to Redis".to_string()))?
            .map_err(|e| CacheError::Unavailable(format!("Failed to connect to Redis: {e}")))?;

        debug!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis");
        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            timeout: config.operation_timeout(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn bounded<T>(
        &self,
        command: &str,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> CacheResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| {
                CacheError::Unavailable(format!("{command} timed out after {:?}", self.timeout))
            })?
            .map_err(|e| CacheError::Unavailable(format!("{command} failed: {e}")))
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        self.bounded("GET", conn.get(self.key(key))).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value).arg("EX").arg(ttl.as_secs().max(1));
        self.bounded("SET", cmd.query_async::<_, ()>(&mut conn)).await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
