//! Fixed-window limiter persisting its buckets in a [`Store`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::backend::{LimitError, Limiter};
use super::bucket::{Bucket, Usage};
use crate::clock::{self, Clock, SystemClock};
use crate::store::{Store, StoreError};

/// Default number of requests admitted per window.
pub const DEFAULT_LIMIT: u64 = 60;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Admits at most `limit` requests per key in each fixed window.
///
/// A window opens on the first `take` for a key with no live bucket and
/// closes when the store expires that bucket. The limiter never deletes a
/// bucket itself.
///
/// `take` runs its read-decide-write sequence under an exclusive lock
/// covering every key, and `check` reads under the shared side of the same
/// lock, so a check never observes a half-applied take.
pub struct WindowLimiter<S> {
    /// Length of each window
    window: Duration,
    /// Requests admitted per window
    limit: u64,
    /// Where buckets live
    store: Arc<S>,
    /// Time source, shared with the store
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write cycles
    lock: RwLock<()>,
}

impl<S: Store> WindowLimiter<S> {
    /// Create a limiter driven by the system clock.
    pub fn new(window: Duration, limit: u64, store: Arc<S>) -> Self {
        Self::with_clock(window, limit, store, Arc::new(SystemClock))
    }

    /// Create a limiter driven by `clock`.
    pub fn with_clock(window: Duration, limit: u64, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            limit,
            store,
            clock,
            lock: RwLock::new(()),
        }
    }

    /// End of a window opened at `now`, in unix seconds.
    fn window_end(&self, now: DateTime<Utc>) -> i64 {
        clock::add_duration(now, self.window).timestamp()
    }

    /// Load the live bucket for `key`, if there is one.
    async fn load(&self, key: &str) -> Result<Option<Bucket>, LimitError> {
        let loaded: Result<Bucket, StoreError> = self.store.get(key).await;
        match loaded {
            Ok(bucket) => Ok(Some(bucket)),
            Err(StoreError::Miss) => Ok(None),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to load bucket");
                Err(LimitError::Internal(e))
            }
        }
    }

    /// Persist `bucket` under `key` for `ttl`.
    async fn save(&self, key: &str, bucket: &Bucket, ttl: Duration) -> Result<(), LimitError> {
        self.store.set(key, bucket, ttl).await.map_err(|e| {
            warn!(key = %key, error = %e, "Failed to save bucket");
            LimitError::Internal(e)
        })
    }
}

#[async_trait]
impl<S: Store> Limiter for WindowLimiter<S> {
    async fn check(&self, key: &str) -> Result<Usage, LimitError> {
        let _guard = self.lock.read().await;

        let usage = match self.load(key).await? {
            Some(bucket) => bucket.usage(),
            // Projected window end; nothing is stored.
            None => Usage {
                count: 0,
                expiration: self.window_end(self.clock.now()),
            },
        };

        trace!(key = %key, count = usage.count, expiration = usage.expiration, "Checked usage");
        Ok(usage)
    }

    async fn take(&self, key: &str) -> Result<Usage, LimitError> {
        let _guard = self.lock.write().await;

        let Some(mut bucket) = self.load(key).await? else {
            let bucket = Bucket::open(self.window_end(self.clock.now()));
            self.save(key, &bucket, self.window).await?;

            debug!(
                key = %key,
                expiration = bucket.expiration,
                "Opened new window"
            );
            return Ok(bucket.usage());
        };

        if bucket.is_full(self.limit) {
            debug!(
                key = %key,
                count = bucket.count,
                limit = self.limit,
                expiration = bucket.expiration,
                "Rate limit exceeded"
            );
            return Err(LimitError::ReachLimit {
                count: bucket.count,
                expiration: bucket.expiration,
            });
        }

        bucket.count += 1;

        // Keep the entry's lifetime pinned to the window end fixed at creation.
        let ttl = DateTime::from_timestamp(bucket.expiration, 0)
            .map(|end| clock::remaining(self.clock.now(), end))
            .unwrap_or(Duration::ZERO);
        self.save(key, &bucket, ttl).await?;

        trace!(
            key = %key,
            count = bucket.count,
            expiration = bucket.expiration,
            ttl_ms = ttl.as_millis() as u64,
            "Admitted request"
        );
        Ok(bucket.usage())
    }

    fn window(&self) -> Duration {
        self.window
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
