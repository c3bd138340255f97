//! Fixed-window rate limiting over an expiring store.

mod backend;
mod bucket;
mod limiter;

pub use backend::{LimitError, Limiter};
pub use bucket::{Bucket, Usage};
pub use limiter::{WindowLimiter, DEFAULT_LIMIT, DEFAULT_WINDOW};
