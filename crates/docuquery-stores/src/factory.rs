//! Factory for creating cache and metadata store backends.

use std::sync::Arc;

use tracing::warn;

use docuquery_core::config::{CacheConfig, DatabaseConfig};
use docuquery_core::error::StoreResult;
use docuquery_core::traits::{MetadataStore, PayloadStore, ResultCache};

/// Durable backends: the metadata store and the payload store share one database.
#[derive(Clone)]
pub struct DurableStores {
    pub metadata: Arc<dyn MetadataStore>,
    pub payloads: Arc<dyn PayloadStore>,
}

/// Factory for creating store backends from configuration.
pub struct StoreFactory;

impl StoreFactory {
    /// Create the result cache.
    ///
    /// The cache is an optimization: when Redis cannot be reached at startup the
    /// pipeline runs against a no-op cache instead of refusing to start.
    pub async fn cache(config: &CacheConfig) -> Arc<dyn ResultCache> {
        #[cfg(feature = "redis")]
        {
            match crate::redis_cache::RedisResultCache::new(config).await {
                Ok(cache) => return Arc::new(cache),
                Err(e) => warn!(error = %e, "Result cache unavailable, continuing without it"),
            }
        }

        #[cfg(not(feature = "redis"))]
        warn!(url = %config.url, "Built without the redis feature, result cache disabled");

        Arc::new(docuquery_core::NoopCache)
    }

    /// Create the metadata and payload stores.
    pub async fn durable(config: &DatabaseConfig) -> StoreResult<DurableStores> {
        #[cfg(feature = "postgres")]
        {
            let store = Arc::new(crate::postgres::PostgresMetadataStore::new(config).await?);
            Ok(DurableStores {
                metadata: store.clone(),
                payloads: store,
            })
        }

        #[cfg(not(feature = "postgres"))]
        {
            warn!(url = %config.url, "Built without the postgres feature, metadata kept in memory");
            Ok(DurableStores {
                metadata: Arc::new(docuquery_core::memory::InMemoryMetadataStore::new()),
                payloads: Arc::new(docuquery_core::memory::InMemoryPayloadStore::new()),
            })
        }
    }
}

#[cfg(all(test, feature = "redis"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_noop() {
        let config = CacheConfig {
            url: "redis://127.0.0.1:1/0".to_string(),
            ..CacheConfig::default()
        };
        let cache = StoreFactory::cache(&config).await;
        assert_eq!(cache.backend(), "noop");
    }
}
