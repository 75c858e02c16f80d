//! Cache configuration

use std::time::Duration;

use crate::key::Provider;

/// Configuration for the two-tier weather cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for local (in-process) entries
    pub local_ttl: Duration,
    /// Time-to-live for remote (Redis) entries
    pub remote_ttl: Duration,
    /// How often the local sweep worker drops expired entries
    pub sweep_interval: Duration,
    /// Optional bound on local entries. `None` keeps the local tier TTL-only.
    pub local_max_capacity: Option<u64>,
    /// Upper bound for a single remote command
    pub remote_timeout: Duration,
    /// Prepended to every remote key, e.g. `"weather:"`
    pub remote_key_prefix: String,
    /// Provider used when a request names none, and for eviction keys
    pub default_provider: Provider,
    /// Language used when a request names none, and for eviction keys
    pub default_language: String,
    /// Join concurrent cold misses for the same key into one origin call
    pub coalesce_origin_fetches: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_ttl: Duration::from_secs(600),  // 10 minutes
            remote_ttl: Duration::from_secs(600), // 10 minutes
            sweep_interval: Duration::from_secs(30),
            local_max_capacity: None,
            remote_timeout: Duration::from_secs(2),
            remote_key_prefix: String::new(),
            default_provider: Provider::OpenWeatherMap,
            default_language: "en".to_owned(),
            coalesce_origin_fetches: false,
        }
    }
}
