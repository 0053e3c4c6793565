//! In-memory response cache
//!
//! Decoded endpoint payloads keyed by (upstream, endpoint path). Entries
//! expire lazily: an expired entry reads as a miss and is dropped on the
//! way out. A background sweep only bounds memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A decoded endpoint payload, shared between the cache and snapshots
pub type Payload = Arc<Value>;

/// Cache key: one entry per endpoint per upstream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub upstream: String,
    pub endpoint: String,
}

impl CacheKey {
    pub fn new(upstream: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    payload: Payload,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh_at(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Thread-safe TTL cache shared by every puller.
///
/// The map is sharded, so pulls for different upstreams rarely contend.
/// Writes to the same key are last-write-wins.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh payload for `key`, or `None` when absent or expired
    pub fn get(&self, key: &CacheKey) -> Option<Payload> {
        let now = Instant::now();

        let fresh = self
            .entries
            .get(key)
            .and_then(|entry| entry.is_fresh_at(now).then(|| entry.payload.clone()));

        match fresh {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("alertpull_cache_hits_total").increment(1);
                Some(payload)
            }
            None => {
                self.entries
                    .remove_if(key, |_, entry| !entry.is_fresh_at(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("alertpull_cache_misses_total").increment(1);
                None
            }
        }
    }

    /// Store `payload` under `key` for `ttl`, replacing any previous entry
    pub fn set(&self, key: CacheKey, payload: Payload, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now + MAX_TTL);

        debug!(
            "Caching {}/{} for {:?}",
            key.upstream, key.endpoint, ttl
        );

        self.entries.insert(
            key,
            CacheEntry {
                payload,
                expires_at,
            },
        );
    }

    /// Drop a single entry, returning whether it existed
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry of one upstream
    pub fn invalidate_upstream(&self, upstream: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.upstream != upstream);
        before.saturating_sub(self.entries.len())
    }

    /// Remove expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh_at(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Upper bound for a single entry's lifetime
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Spawn a background task that purges expired entries periodically
pub fn spawn_cleanup_task(
    cache: Arc<ResponseCache>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    info!(
        "Starting background cache cleanup task (interval: {:?})",
        interval
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Cache cleanup task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        debug!("Purged {} expired cache entries", purged);
                    }
                }
            }
        }
    })
}
