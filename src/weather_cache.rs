//! Weather lookups through the two-tier cache
//!
//! Each weather provider implements [`WeatherOrigin`]. Providers are
//! registered once in a [`ProviderRegistry`]; [`WeatherCache`] validates the
//! request, builds the cache key and hands the orchestrator a fetch that
//! closes over the chosen origin and the request parameters.
//!
//! ## Cache Keys
//!
//! - `Lisbon-current-OPENWEATHERMAP-en`
//! - `coords-38.722300,-9.139300-forecast-WEATHERAPI-pt`

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    CacheConfig, CacheError, OriginError,
    key::{CacheKey, Document, Operation, Provider, Subject},
    local_store::LocalStore,
    orchestrator::CacheOrchestrator,
    remote_store::RedisStore,
    stats::{CacheHealth, CacheStats},
};

/// A weather provider behind the cache.
///
/// Retry and rate limiting belong here, not in the cache.
#[async_trait]
pub trait WeatherOrigin: Send + Sync + 'static {
    fn provider(&self) -> Provider;

    async fn current_by_city(&self, city: &str, language: &str) -> Result<Document, OriginError>;

    async fn forecast_by_city(&self, city: &str, language: &str)
    -> Result<Document, OriginError>;

    async fn current_by_coords(
        &self,
        lat: f64,
        lon: f64,
        language: &str,
    ) -> Result<Document, OriginError>;

    async fn forecast_by_coords(
        &self,
        lat: f64,
        lon: f64,
        language: &str,
    ) -> Result<Document, OriginError>;

    async fn is_available(&self) -> bool {
        true
    }
}

/// Origins keyed by provider, assembled once at startup
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    origins: HashMap<Provider, Arc<dyn WeatherOrigin>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an origin under its own provider, replacing any earlier one.
    pub fn with(mut self, origin: impl WeatherOrigin) -> Self {
        self.origins.insert(origin.provider(), Arc::new(origin));
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn WeatherOrigin>, CacheError> {
        self.origins
            .get(&provider)
            .cloned()
            .ok_or(CacheError::ProviderNotConfigured(provider))
    }

    /// Registered providers, in catalogue order
    pub fn providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.origins.contains_key(p))
            .collect()
    }
}

/// Weather cache with per-operation lookups
#[derive(Clone)]
pub struct WeatherCache {
    cache: CacheOrchestrator,
    origins: ProviderRegistry,
}

impl WeatherCache {
    pub fn new(cache: CacheOrchestrator, origins: ProviderRegistry) -> Self {
        info!(
            "WeatherCache initialized with providers: {:?}",
            origins.providers()
        );
        Self { cache, origins }
    }

    /// Build the local store, connect the Redis tier and wire both together.
    pub async fn connect(
        redis_client: redis::Client,
        origins: ProviderRegistry,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        let remote = RedisStore::connect(redis_client, &config).await?;
        let local = LocalStore::new(&config)?;
        let cache = CacheOrchestrator::new(Arc::new(local), Arc::new(remote), config);
        Ok(Self::new(cache, origins))
    }

    pub fn orchestrator(&self) -> &CacheOrchestrator {
        &self.cache
    }

    pub async fn current_by_city(
        &self,
        city: &str,
        provider: Option<Provider>,
        language: Option<&str>,
    ) -> Result<Arc<Document>, CacheError> {
        self.lookup(Subject::city(city)?, Operation::Current, provider, language)
            .await
    }

    pub async fn forecast_by_city(
        &self,
        city: &str,
        provider: Option<Provider>,
        language: Option<&str>,
    ) -> Result<Arc<Document>, CacheError> {
        self.lookup(Subject::city(city)?, Operation::Forecast, provider, language)
            .await
    }

    pub async fn current_by_coords(
        &self,
        lat: f64,
        lon: f64,
        provider: Option<Provider>,
        language: Option<&str>,
    ) -> Result<Arc<Document>, CacheError> {
        self.lookup(
            Subject::coords(lat, lon)?,
            Operation::Current,
            provider,
            language,
        )
        .await
    }

    pub async fn forecast_by_coords(
        &self,
        lat: f64,
        lon: f64,
        provider: Option<Provider>,
        language: Option<&str>,
    ) -> Result<Arc<Document>, CacheError> {
        self.lookup(
            Subject::coords(lat, lon)?,
            Operation::Forecast,
            provider,
            language,
        )
        .await
    }

    async fn lookup(
        &self,
        subject: Subject,
        operation: Operation,
        provider: Option<Provider>,
        language: Option<&str>,
    ) -> Result<Arc<Document>, CacheError> {
        let config = self.cache.config();
        let provider = provider.unwrap_or(config.default_provider);
        let language = language.unwrap_or(&config.default_language);

        let origin = self.origins.get(provider)?;
        let key = CacheKey::new(&subject, operation, provider, language)?;
        debug!(key = %key, "Weather lookup via {}", provider);

        let language = language.trim().to_owned();
        self.cache
            .get_or_fetch(&key, move || async move {
                match (subject, operation) {
                    (Subject::City(city), Operation::Current) => {
                        origin.current_by_city(&city, &language).await
                    }
                    (Subject::City(city), Operation::Forecast) => {
                        origin.forecast_by_city(&city, &language).await
                    }
                    (Subject::Coords { lat, lon }, Operation::Current) => {
                        origin.current_by_coords(lat, lon, &language).await
                    }
                    (Subject::Coords { lat, lon }, Operation::Forecast) => {
                        origin.forecast_by_coords(lat, lon, &language).await
                    }
                }
            })
            .await
    }

    /// Drop cached current weather and forecast for `city`.
    pub async fn evict_city(&self, city: &str) -> Result<bool, CacheError> {
        self.cache.evict(&Subject::city(city)?).await
    }

    pub async fn evict_coords(&self, lat: f64, lon: f64) -> Result<bool, CacheError> {
        self.cache.evict(&Subject::coords(lat, lon)?).await
    }

    pub async fn evict_all(&self) -> Result<bool, CacheError> {
        self.cache.evict_all().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn health(&self) -> CacheHealth {
        self.cache.health().await
    }

    pub fn available_providers(&self) -> Vec<Provider> {
        self.origins.providers()
    }

    pub async fn is_provider_available(&self, provider: Provider) -> bool {
        match self.origins.get(provider) {
            Ok(origin) => origin.is_available().await,
            Err(_) => false,
        }
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}
