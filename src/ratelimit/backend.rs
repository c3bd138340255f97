//! Limiter trait and its error type.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::bucket::Usage;
use crate::store::StoreError;

/// Reasons a limiter call did not produce a usage snapshot.
#[derive(Debug, Error)]
pub enum LimitError {
    /// The key already used its whole allowance for the current window.
    #[error("rate limiter: reach request limit")]
    ReachLimit {
        /// Requests admitted in the window
        count: u64,
        /// End of the window, in unix seconds
        expiration: i64,
    },

    /// The backing store failed for a reason other than a missing key.
    #[error("rate limiter: internal")]
    Internal(#[source] StoreError),
}

impl LimitError {
    /// Usage carried by a rejection, if any.
    pub fn usage(&self) -> Option<Usage> {
        match self {
            LimitError::ReachLimit { count, expiration } => Some(Usage {
                count: *count,
                expiration: *expiration,
            }),
            LimitError::Internal(_) => None,
        }
    }
}

/// Trait for limiter implementations.
///
/// The HTTP layer only talks to this trait, so the window policy or its
/// storage can change without touching request handling.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Report usage for `key` without consuming any allowance.
    async fn check(&self, key: &str) -> Result<Usage, LimitError>;

    /// Admit one request for `key`, or reject it once the window is full.
    async fn take(&self, key: &str) -> Result<Usage, LimitError>;

    /// Length of each window.
    fn window(&self) -> Duration;

    /// Requests admitted per window.
    fn limit(&self) -> u64;

    /// The instant this limiter measures windows against.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
