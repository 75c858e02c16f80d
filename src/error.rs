//! Cache error types

use std::{sync::Arc, time::Duration};

use redis::RedisError;

use crate::key::Provider;

/// Errors surfaced to callers of the cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid key input: {0}")]
    InvalidKeyInput(String),

    #[error(transparent)]
    Origin(#[from] OriginError),

    #[error("Remote store error: {0}")]
    Remote(#[from] StoreError),

    #[error("Failed to start local sweep worker: {0}")]
    SweepWorker(#[from] std::io::Error),

    #[error("Unknown weather provider: {0}")]
    UnknownProvider(String),

    #[error("No origin registered for provider {0}")]
    ProviderNotConfigured(Provider),
}

/// Failures talking to the remote tier.
///
/// Every variant means the remote store is unavailable for this call. The
/// orchestrator logs these and degrades; they never reach its callers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote store did not answer within {0:?}")]
    Timeout(Duration),
}

/// An origin (weather provider) call failed.
///
/// Cheap to clone so that every waiter on a coalesced fetch sees the same
/// failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider} request failed: {source}")]
pub struct OriginError {
    provider: Provider,
    #[source]
    source: Arc<dyn std::error::Error + Send + Sync>,
}

impl OriginError {
    pub fn new(
        provider: Provider,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            provider,
            source: Arc::from(source.into()),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}
