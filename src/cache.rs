//! Time-bounded, single-flight memoization of metric snapshots.
//!
//! The cache lock is held for the whole duration of a refresh. Callers that
//! arrive while a refresh is in flight wait on the lock and then observe the
//! freshly stored snapshot instead of issuing their own upstream call, so a
//! domain never runs more than one command at a time and, under steady load,
//! at most one per TTL window.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry<T> {
    snapshot: Option<Arc<T>>,
    stored_at: Option<Instant>,
    fetch_duration: Duration,
}

/// A TTL cache in front of an expensive fetch.
pub struct ThrottledCache<T> {
    limit: f64,
    entry: Mutex<CacheEntry<T>>,
}

impl<T> ThrottledCache<T> {
    /// Creates an empty cache whose entries stay fresh for `limit` seconds.
    pub fn new(limit: f64) -> Self {
        Self {
            limit,
            entry: Mutex::new(CacheEntry {
                snapshot: None,
                stored_at: None,
                fetch_duration: Duration::ZERO,
            }),
        }
    }

    /// The configured freshness window in seconds.
    pub fn limit(&self) -> f64 {
        self.limit
    }

    /// Returns the cached snapshot while it is fresh, otherwise runs `fetch`
    /// under the lock and stores its result.
    ///
    /// A failed fetch leaves the previous snapshot and its timestamp in place;
    /// the error goes to this caller only and the next call tries again.
    pub async fn fetch_with<F, Fut, E>(&self, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut entry = self.entry.lock().await;

        if let (Some(snapshot), Some(stored_at)) = (&entry.snapshot, entry.stored_at) {
            if stored_at.elapsed().as_secs_f64() < self.limit {
                return Ok(Arc::clone(snapshot));
            }
        }

        let start = Instant::now();
        let snapshot = Arc::new(fetch().await?);
        entry.fetch_duration = start.elapsed();
        entry.snapshot = Some(Arc::clone(&snapshot));
        entry.stored_at = Some(Instant::now());
        debug!(
            fetch_ms = entry.fetch_duration.as_millis() as u64,
            "Refreshed cached snapshot"
        );
        Ok(snapshot)
    }

    /// Duration of the last successful refresh.
    pub async fn last_fetch_duration(&self) -> Duration {
        self.entry.lock().await.fetch_duration
    }
}
