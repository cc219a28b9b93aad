//! docuquery-stores - Cache and metadata store backends for docuquery.
//!
//! # Features
//!
//! - `redis` (default) - [`RedisResultCache`] over a Redis connection manager
//! - `postgres` (default) - [`PostgresMetadataStore`] over a deadpool-postgres pool, also
//!   keeping the payloads of failed documents
//!
//! # Example
//!
//! ```ignore
//! use docuquery_stores::StoreFactory;
//!
//! let cache = StoreFactory::cache(&config.cache).await;
//! let stores = StoreFactory::durable(&config.database).await?;
//! ```

mod factory;

#[cfg(feature = "redis")]
mod redis_cache;

#[cfg(feature = "postgres")]
mod postgres;

pub use factory::{DurableStores, StoreFactory};

#[cfg(feature = "redis")]
pub use redis_cache::RedisResultCache;

#[cfg(feature = "postgres")]
pub use postgres::PostgresMetadataStore;
