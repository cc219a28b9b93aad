//! Result cache trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Key-value cache holding serialized extraction results.
///
/// Backends return raw JSON; decoding and failure handling live in
/// [`CacheLayer`](crate::cache::CacheLayer).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Get the value stored under `key`, if any.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Replace the value stored under `key`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Backend name for logging.
    fn backend(&self) -> &'static str;
}
