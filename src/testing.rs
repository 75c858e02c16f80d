//! In-memory stand-ins for the remote tier and the origin, used by unit tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{
    CacheConfig, OriginError, StoreError,
    key::{CacheKey, Document, Provider, Region},
    local_store::LocalStore,
    orchestrator::CacheOrchestrator,
    remote_store::RemoteStore,
};

pub(crate) fn doc(value: serde_json::Value) -> Document {
    value
        .as_object()
        .cloned()
        .expect("test documents are JSON objects")
}

fn unavailable() -> StoreError {
    StoreError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

/// Remote store kept in process. Values are stored as JSON text so they go
/// through the same serialization as with Redis.
#[derive(Default)]
pub(crate) struct FakeRemote {
    entries: Mutex<HashMap<String, (Region, String, Instant)>>,
    failing: AtomicBool,
    put_delay: Duration,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl FakeRemote {
    pub(crate) fn failing() -> Self {
        let remote = Self::default();
        remote.set_failing(true);
        remote
    }

    /// Writes take `delay` before they land.
    pub(crate) fn with_put_delay(delay: Duration) -> Self {
        Self {
            put_delay: delay,
            ..Self::default()
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Seed an entry directly, bypassing the failure switch.
    pub(crate) fn seed(&self, key: &CacheKey, value: &Document, ttl: Duration) {
        let json = serde_json::to_string(value).expect("serializable");
        self.entries.lock().unwrap().insert(
            key.as_str().to_owned(),
            (key.region(), json, Instant::now() + ttl),
        );
    }

    /// Seed raw stored text, e.g. an entry that is not valid JSON.
    pub(crate) fn seed_raw(&self, key: &CacheKey, raw: &str, ttl: Duration) {
        self.entries.lock().unwrap().insert(
            key.as_str().to_owned(),
            (key.region(), raw.to_owned(), Instant::now() + ttl),
        );
    }

    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().unwrap().contains_key(key.as_str())
    }

    /// Inspect an entry directly, bypassing the failure switch.
    pub(crate) fn peek(&self, key: &CacheKey) -> Option<Document> {
        let entries = self.entries.lock().unwrap();
        let (_, json, expires_at) = entries.get(key.as_str())?;
        if Instant::now() > *expires_at {
            return None;
        }
        serde_json::from_str(json).ok()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn get(&self, key: &CacheKey) -> Result<Option<Document>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let Some((_, json, expires_at)) = entries.get(key.as_str()) else {
            return Ok(None);
        };
        if Instant::now() > *expires_at {
            return Ok(None);
        }
        match serde_json::from_str(json) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Unreadable entries are dropped, as RedisStore does.
                entries.remove(key.as_str());
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
        self.puts.fetch_add(1, Ordering::SeqCst);
        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }
        self.check()?;
        let json = serde_json::to_string(value)?;
        self.entries.lock().unwrap().insert(
            key.as_str().to_owned(),
            (key.region(), json, Instant::now() + ttl),
        );
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.check()?;
        self.entries.lock().unwrap().remove(key.as_str());
        Ok(())
    }

    async fn clear_region(&self, region: Region) -> Result<(), StoreError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .retain(|_, (entry_region, _, _)| *entry_region != region);
        Ok(())
    }

    async fn info(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.check()?;
        let keys = self.entries.lock().unwrap().len();
        Ok(BTreeMap::from([("keys".to_owned(), keys.to_string())]))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

/// Orchestrator over a fresh local store and the given fake remote.
pub(crate) fn orchestrator_with(remote: Arc<FakeRemote>, config: CacheConfig) -> CacheOrchestrator {
    let local = Arc::new(LocalStore::new(&config).expect("sweep worker starts"));
    CacheOrchestrator::new(local, remote, config)
}

/// A fetch that counts its calls and returns `value`.
pub(crate) fn counting_fetch(
    calls: &Arc<AtomicUsize>,
    value: serde_json::Value,
) -> impl FnOnce() -> BoxFuture<'static, Result<Document, OriginError>> + Send + use<> {
    let calls = Arc::clone(calls);
    move || {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(doc(value))
        })
    }
}

/// A fetch that must not be reached.
pub(crate) fn failing_fetch() -> impl FnOnce() -> BoxFuture<'static, Result<Document, OriginError>> + Send {
    || {
        Box::pin(async {
            Err(OriginError::new(
                Provider::OpenWeatherMap,
                "origin should not have been called",
            ))
        })
    }
}
