//! In-process cache tier
//!
//! One Moka cache per [`Region`], no size bound unless configured. Every
//! entry carries its own expiry, fixed at write time. Expired entries are
//! dropped lazily when read and proactively by a single sweep worker that
//! lives as long as the store.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use moka::{future::Cache, ops::compute::Op};
use tokio::{runtime::Builder, sync::watch, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    CacheConfig,
    key::{CacheKey, Document, Region},
    stats::RegionStats,
};

type RegionCache = Cache<String, LocalEntry>;

/// A value held by the local tier
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub value: Arc<Document>,
    pub inserted_at: Instant,
    /// `None` when `inserted_at + ttl` is past what `Instant` can hold
    pub expires_at: Option<Instant>,
}

impl LocalEntry {
    fn new(value: Arc<Document>, ttl: Duration) -> Self {
        let inserted_at = Instant::now();
        Self {
            value,
            inserted_at,
            expires_at: inserted_at.checked_add(ttl),
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// Per-instance key/value store with per-entry TTL
pub struct LocalStore {
    current: RegionCache,
    forecast: RegionCache,
    sweeper: SweepWorker,
}

impl LocalStore {
    /// Build the store and start its sweep worker.
    pub fn new(config: &CacheConfig) -> std::io::Result<Self> {
        let current = build_region(Region::Current, config.local_max_capacity);
        let forecast = build_region(Region::Forecast, config.local_max_capacity);

        let sweeper = SweepWorker::spawn(
            vec![
                (Region::Current, current.clone()),
                (Region::Forecast, forecast.clone()),
            ],
            config.sweep_interval,
        )?;

        Ok(Self {
            current,
            forecast,
            sweeper,
        })
    }

    fn region(&self, region: Region) -> &RegionCache {
        match region {
            Region::Current => &self.current,
            Region::Forecast => &self.forecast,
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<Document>> {
        let cache = self.region(key.region());
        let entry = cache.get(key.as_str()).await?;
        if entry.is_expired_at(Instant::now()) {
            remove_if_expired(cache, key.as_str(), Instant::now()).await;
            debug!(key = %key, "local entry expired on read");
            return None;
        }
        Some(entry.value)
    }

    /// Insert or overwrite; expiry is `now + ttl`.
    pub async fn put(&self, key: &CacheKey, value: Arc<Document>, ttl: Duration) {
        self.region(key.region())
            .insert(key.as_str().to_owned(), LocalEntry::new(value, ttl))
            .await;
    }

    pub async fn evict(&self, key: &CacheKey) {
        self.region(key.region()).invalidate(key.as_str()).await;
    }

    pub async fn clear_region(&self, region: Region) {
        let cache = self.region(region);
        cache.invalidate_all();
        cache.run_pending_tasks().await;
    }

    pub async fn clear(&self) {
        for region in Region::ALL {
            self.clear_region(region).await;
        }
    }

    /// Entries across all regions, including expired ones not yet swept.
    pub async fn size(&self) -> u64 {
        let mut total = 0;
        for stats in self.region_stats().await {
            total += stats.size;
        }
        total
    }

    pub async fn region_stats(&self) -> Vec<RegionStats> {
        let mut out = Vec::with_capacity(Region::ALL.len());
        for region in Region::ALL {
            let cache = self.region(region);
            cache.run_pending_tasks().await;
            out.push(RegionStats {
                name: region.name().to_owned(),
                size: cache.entry_count(),
            });
        }
        out
    }

    /// Run one sweep pass now. Returns the number of entries dropped.
    pub async fn sweep(&self) -> usize {
        let mut removed = 0;
        for region in Region::ALL {
            removed += sweep_region(self.region(region)).await;
        }
        removed
    }

    /// Stop the sweep worker and wait for it to exit.
    pub fn shutdown(&self) {
        self.sweeper.shutdown();
    }
}

fn build_region(region: Region, max_capacity: Option<u64>) -> RegionCache {
    let builder = Cache::builder().name(region.name());
    match max_capacity {
        Some(capacity) => builder.max_capacity(capacity).build(),
        None => builder.build(),
    }
}

/// Remove `key` only if the entry stored right now is expired, so a
/// concurrent fresh `put` is never thrown away.
async fn remove_if_expired(cache: &RegionCache, key: &str, now: Instant) -> bool {
    let result = cache
        .entry_by_ref(key)
        .and_compute_with(|current| {
            let op = match current {
                Some(entry) if entry.value().is_expired_at(now) => Op::Remove,
                _ => Op::Nop,
            };
            std::future::ready(op)
        })
        .await;
    matches!(result, moka::ops::compute::CompResult::Removed(_))
}

async fn sweep_region(cache: &RegionCache) -> usize {
    let now = Instant::now();
    let expired: Vec<Arc<String>> = cache
        .iter()
        .filter(|(_, entry)| entry.is_expired_at(now))
        .map(|(key, _)| key)
        .collect();

    let mut removed = 0;
    for key in expired {
        if remove_if_expired(cache, key.as_str(), now).await {
            removed += 1;
        }
    }
    cache.run_pending_tasks().await;
    removed
}

/// Background thread with its own single-threaded runtime, so the store can
/// be built outside of any Tokio context.
struct SweepWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SweepWorker {
    fn spawn(regions: Vec<(Region, RegionCache)>, interval: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = thread::Builder::new()
            .name("local-cache-sweep".to_owned())
            .spawn(move || {
                let rt = match Builder::new_current_thread().enable_time().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("LocalStore: failed to build sweep runtime: {}", e);
                        return;
                    }
                };
                rt.block_on(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // The first tick completes immediately.
                    ticker.tick().await;
                    info!("LocalStore: sweep worker started (every {:?})", interval);

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                for (region, cache) in &regions {
                                    let removed = sweep_region(cache).await;
                                    if removed > 0 {
                                        debug!(
                                            "LocalStore: swept {} expired entries from {}",
                                            removed, region
                                        );
                                    }
                                }
                            }
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                    info!("LocalStore: sweep worker stopped");
                });
            })?;

        Ok(Self {
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("LocalStore: sweep worker panicked");
        }
    }
}

impl Drop for SweepWorker {
    fn drop(&mut self) {
        // Dropping the sender also wakes the worker; this just makes it explicit.
        let _ = self.shutdown_tx.send(true);
    }
}
