//! weather-cache - Two-tier read-through cache for weather providers
//!
//! This library fronts rate-limited weather APIs with two cache tiers:
//! - Local: in-memory Moka cache per instance (fastest)
//! - Remote: Redis cache (shared across instances, survives restarts)
//! - Origin: the weather provider, called only when both tiers miss
//!
//! The cache supports:
//! - Deterministic string keys per subject, operation, provider and language
//! - Independent TTLs per tier, with a background sweep of the local tier
//! - Degrading to the origin when Redis is unavailable
//! - Eviction per subject or of everything, plus live stats and health
//! - Optional coalescing of concurrent misses for the same key

mod config;
mod error;
pub mod key;
pub mod local_store;
pub mod orchestrator;
pub mod remote_store;
pub mod stats;
pub mod weather_cache;

#[cfg(test)]
mod testing;

pub use config::CacheConfig;
pub use error::{CacheError, OriginError, StoreError};
pub use key::{CacheKey, Document, Operation, Provider, Region, Subject};
pub use local_store::LocalStore;
pub use orchestrator::{CacheOrchestrator, Resolved, ResolvedFrom};
pub use remote_store::{RedisStore, RemoteStore};
pub use stats::{CacheHealth, CacheStats, RegionStats};
pub use weather_cache::{ProviderRegistry, WeatherCache, WeatherOrigin};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
