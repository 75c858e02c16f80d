//! Two-tier read-through cache
//!
//! Lookup order for [`CacheOrchestrator::get_or_fetch`]:
//! - Local (in-process Moka, fastest)
//! - Remote (Redis, shared across instances)
//! - Origin (caller-supplied fetch), whose result is written to Remote and
//!   then Local
//!
//! Remote failures are logged and treated as misses. Origin failures are
//! returned unchanged and never cached.
//!
//! By default concurrent misses on the same cold key each call the origin.
//! Setting [`CacheConfig::coalesce_origin_fetches`] makes them share a single
//! in-flight call instead.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    CacheConfig, CacheError, OriginError,
    key::{CacheKey, Document, Operation, Subject},
    local_store::LocalStore,
    remote_store::RemoteStore,
    stats::{CacheHealth, CacheStats},
};

/// Which tier answered a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    Local,
    Remote,
    Origin,
}

/// Outcome of a lookup, including how it was served
#[derive(Debug, Clone)]
pub struct Resolved {
    pub value: Arc<Document>,
    pub source: ResolvedFrom,
    /// The remote tier failed during this lookup and was skipped
    pub remote_degraded: bool,
}

type FetchOutcome = Result<Arc<Document>, OriginError>;
type InFlightFetch = watch::Receiver<Option<FetchOutcome>>;
type InFlightMap = Arc<Mutex<HashMap<CacheKey, InFlightFetch>>>;

/// Removes the in-flight entry however the leading fetch ends.
///
/// If it is dropped before `complete`, the sender goes with it and waiters
/// run their own fetch.
struct InFlightGuard {
    key: CacheKey,
    in_flight: InFlightMap,
    tx: Option<watch::Sender<Option<FetchOutcome>>>,
}

impl InFlightGuard {
    fn complete(mut self, outcome: FetchOutcome) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(outcome));
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&self.key);
    }
}

struct Inner {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    config: CacheConfig,
    in_flight: InFlightMap,
}

impl Inner {
    /// Write a freshly fetched value to Remote, then Local.
    async fn populate(&self, key: &CacheKey, value: Arc<Document>) {
        if let Err(e) = self
            .remote
            .put(key, &value, self.config.remote_ttl)
            .await
        {
            warn!(
                "Remote PUT error for key {} ({}). Continuing with local only.",
                key, e
            );
        }
        self.local.put(key, value, self.config.local_ttl).await;
    }
}

/// Coordinates the local and remote tiers in front of an origin.
///
/// Holds no entries itself; both stores are injected and may be inspected
/// directly. Cheap to clone.
#[derive(Clone)]
pub struct CacheOrchestrator {
    inner: Arc<Inner>,
}

impl CacheOrchestrator {
    pub fn new(local: Arc<LocalStore>, remote: Arc<dyn RemoteStore>, config: CacheConfig) -> Self {
        info!(
            "CacheOrchestrator initialized (local ttl {:?}, remote ttl {:?}, coalescing {})",
            config.local_ttl, config.remote_ttl, config.coalesce_origin_fetches
        );
        Self {
            inner: Arc::new(Inner {
                local,
                remote,
                config,
                in_flight: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.inner.local
    }

    pub fn remote(&self) -> &dyn RemoteStore {
        self.inner.remote.as_ref()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get the value for `key`, calling `fetch` only when both tiers miss.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> Result<Arc<Document>, CacheError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Document, OriginError>> + Send,
    {
        self.get_or_fetch_traced(key, fetch)
            .await
            .map(|resolved| resolved.value)
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), reporting which tier answered.
    pub async fn get_or_fetch_traced<F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> Result<Resolved, CacheError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Document, OriginError>> + Send,
    {
        // Local
        if let Some(value) = self.inner.local.get(key).await {
            debug!(key = %key, "Cache hit local");
            return Ok(Resolved {
                value,
                source: ResolvedFrom::Local,
                remote_degraded: false,
            });
        }
        debug!(key = %key, "Cache miss local");

        // Remote
        let mut remote_degraded = false;
        match self.inner.remote.get(key).await {
            Ok(Some(doc)) => {
                debug!(key = %key, "Cache hit remote");
                let value = Arc::new(doc);
                self.inner
                    .local
                    .put(key, Arc::clone(&value), self.inner.config.local_ttl)
                    .await;
                return Ok(Resolved {
                    value,
                    source: ResolvedFrom::Remote,
                    remote_degraded: false,
                });
            }
            Ok(None) => debug!(key = %key, "Cache miss remote"),
            Err(e) => {
                warn!(
                    "Remote GET error for key {} ({}). Falling back to origin.",
                    key, e
                );
                remote_degraded = true;
            }
        }

        // Origin
        let value = if self.inner.config.coalesce_origin_fetches {
            self.fetch_coalesced(key, fetch).await?
        } else {
            self.fetch_and_populate(key, fetch).await?
        };

        Ok(Resolved {
            value,
            source: ResolvedFrom::Origin,
            remote_degraded,
        })
    }

    async fn fetch_and_populate<F, Fut>(&self, key: &CacheKey, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Document, OriginError>> + Send,
    {
        let value = match fetch().await {
            Ok(doc) => Arc::new(doc),
            Err(e) => {
                error!("Origin error for key {}: {}", key, e);
                return Err(e);
            }
        };
        debug!(key = %key, "Fetched from origin");

        // Population runs on its own task so that it still completes if the
        // caller is cancelled while waiting for it.
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task_value = Arc::clone(&value);
        let population = tokio::spawn(async move {
            inner.populate(&task_key, task_value).await;
        });
        if let Err(e) = population.await {
            warn!("Cache population for key {} did not finish: {}", key, e);
        }

        Ok(value)
    }

    async fn fetch_coalesced<F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> Result<Arc<Document>, CacheError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Document, OriginError>> + Send,
    {
        loop {
            let claim = {
                let mut in_flight = match self.inner.in_flight.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match in_flight.get(key) {
                    Some(rx) => Claim::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        in_flight.insert(key.clone(), rx);
                        Claim::Lead(InFlightGuard {
                            key: key.clone(),
                            in_flight: Arc::clone(&self.inner.in_flight),
                            tx: Some(tx),
                        })
                    }
                }
            };

            match claim {
                Claim::Lead(guard) => {
                    let outcome = self.fetch_and_populate(key, fetch).await;
                    guard.complete(outcome.clone());
                    return Ok(outcome?);
                }
                Claim::Wait(rx) => {
                    debug!(key = %key, "Waiting for in-flight origin fetch");
                    if let Some(outcome) = wait_for(rx).await {
                        return Ok(outcome?);
                    }
                    // The leader was cancelled; claim the key again.
                    debug!(key = %key, "In-flight origin fetch abandoned, retrying");
                }
            }
        }
    }

    /// Drop the `current` and `forecast` entries of `subject` from both tiers.
    ///
    /// Keys are built with the configured default provider and language.
    /// Remote failures are logged; the result is `false` only when neither
    /// tier could be cleaned.
    pub async fn evict(&self, subject: &Subject) -> Result<bool, CacheError> {
        let config = &self.inner.config;
        let keys = Operation::ALL
            .into_iter()
            .map(|op| {
                CacheKey::new(
                    subject,
                    op,
                    config.default_provider,
                    &config.default_language,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        for key in &keys {
            self.inner.local.evict(key).await;
        }
        // The local tier has no failure mode.
        let local_ok = true;

        let results = join_all(keys.iter().map(|key| self.inner.remote.evict(key))).await;
        let mut remote_ok = true;
        for (key, result) in keys.iter().zip(results) {
            if let Err(e) = result {
                warn!("Remote DEL error for key {} ({}). Continuing.", key, e);
                remote_ok = false;
            }
        }

        info!("Evicted cache for subject: {}", subject);
        Ok(local_ok || remote_ok)
    }

    /// Clear every region in both tiers. Same failure policy as [`evict`](Self::evict).
    pub async fn evict_all(&self) -> Result<bool, CacheError> {
        self.inner.local.clear().await;
        let local_ok = true;

        let remote_ok = match self.inner.remote.clear().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Remote clear failed ({}). Local tier was cleared.", e);
                false
            }
        };

        info!("Evicted all cache entries");
        Ok(local_ok || remote_ok)
    }

    /// Live per-tier sizes. Never fails; problems are reported in the result.
    pub async fn stats(&self) -> CacheStats {
        let local = self.inner.local.region_stats().await;
        match self.inner.remote.info().await {
            Ok(remote) => CacheStats {
                local,
                remote,
                available: true,
                error: None,
            },
            Err(e) => {
                error!("Error getting cache stats: {}", e);
                CacheStats {
                    local,
                    remote: Default::default(),
                    available: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn health(&self) -> CacheHealth {
        let remote_available = match self.inner.remote.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Remote cache not available: {}", e);
                false
            }
        };
        CacheHealth {
            local_available: true,
            remote_available,
        }
    }

    /// Stop the local sweep worker.
    pub fn shutdown(&self) {
        self.inner.local.shutdown();
    }
}

enum Claim {
    Lead(InFlightGuard),
    Wait(InFlightFetch),
}

/// Wait for a shared fetch to publish its outcome. `None` means the leader
/// went away without one.
async fn wait_for(mut rx: InFlightFetch) -> Option<FetchOutcome> {
    loop {
        let published = rx.borrow_and_update().clone();
        if published.is_some() {
            return published;
        }
        rx.changed().await.ok()?;
    }
}
