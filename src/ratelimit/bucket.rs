//! Per-key window state.

use serde::{Deserialize, Serialize};

/// Requests admitted for one key in its current window.
///
/// The expiration is fixed when the bucket is created and never moves; the
/// bucket disappears when the store entry holding it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Requests admitted in this window
    pub count: u64,
    /// End of the window, in unix seconds
    pub expiration: i64,
}

impl Bucket {
    /// Open a new window holding its first admitted request.
    pub fn open(expiration: i64) -> Self {
        Self {
            count: 1,
            expiration,
        }
    }

    /// Whether another request would exceed `limit`.
    pub fn is_full(&self, limit: u64) -> bool {
        self.count >= limit
    }

    /// Usage snapshot of this bucket.
    pub fn usage(&self) -> Usage {
        Usage {
            count: self.count,
            expiration: self.expiration,
        }
    }
}

/// Usage reported to callers of `check` and `take`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Requests admitted in the current window
    pub count: u64,
    /// End of the current window, in unix seconds
    pub expiration: i64,
}

impl Usage {
    /// Seconds until the window ends, as seen at `now` (unix seconds).
    pub fn retry_after(&self, now: i64) -> u64 {
        u64::try_from(self.expiration.saturating_sub(now)).unwrap_or(0)
    }
}
