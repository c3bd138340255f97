//! Key-value storage with per-entry expiration.
//!
//! The limiter persists its buckets through the [`Store`] contract only, so a
//! networked or persistent store can replace [`MemoryStore`] without touching
//! the limiter.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryStore;

/// Errors reported by a [`Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key was never set or its entry has expired.
    #[error("cache: miss")]
    Miss,
    /// The stored bytes could not be decoded into the requested type.
    #[error("cache: stored data is not supported: {0}")]
    Data(#[source] serde_json::Error),
    /// The value could not be encoded for storage.
    #[error("cache: failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Storage of serializable values under string keys, each with its own TTL.
///
/// An expired entry must be indistinguishable from one that was never set.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read and decode the value stored under `key`.
    async fn get<T>(&self, key: &str) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Send;

    /// Encode and store `value` under `key`, replacing any existing entry.
    ///
    /// A zero `ttl` leaves no live entry behind.
    async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StoreError>
    where
        T: Serialize + Sync;
}
