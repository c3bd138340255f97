//! In-process store backed by a concurrent hash map.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{Store, StoreError};
use crate::clock::{self, Clock, SystemClock};

/// A stored value and the instant it stops being readable.
#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory [`Store`] holding JSON-encoded values.
///
/// Expired entries are dropped lazily on `get` and in bulk by
/// [`purge_expired`](MemoryStore::purge_expired), which the janitor task
/// started with [`spawn_janitor`](MemoryStore::spawn_janitor) calls periodically.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of entries held, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Spawn a background task that purges expired entries every `interval`.
    ///
    /// The task exits on its own once the store has been dropped.
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Store dropped, stopping janitor");
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "Purged expired entries");
                }
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get<T>(&self, key: &str) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        let now = self.clock.now();

        // The map guard is released at the end of this statement, before any removal.
        let lookup = self
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));

        match lookup {
            Some(Some(value)) => serde_json::from_slice(&value).map_err(StoreError::Data),
            Some(None) => {
                trace!(key, "Entry expired");
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                Err(StoreError::Miss)
            }
            None => Err(StoreError::Miss),
        }
    }

    async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value).map_err(StoreError::Encode)?;

        if ttl.is_zero() {
            trace!(key, "Zero TTL, dropping entry");
            self.entries.remove(key);
            return Ok(());
        }

        let expires_at = clock::add_duration(self.clock.now(), ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: bytes,
                expires_at,
            },
        );
        Ok(())
    }
}
