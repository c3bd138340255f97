//! Ratewindow - Per-Client Fixed-Window Rate Limiting
//!
//! This crate implements a rate limiting service that admits at most a fixed
//! number of requests per client in each fixed time window. Window state lives
//! in an in-process key-value store whose entry expiration doubles as the
//! window reset.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
