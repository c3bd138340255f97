//! HTTP front end exposing the limiter.

mod client;
mod server;
mod service;

pub use client::{ClientKey, ProxyPolicy};
pub use server::HttpServer;
pub use service::{router, ErrorBody, UsageBody};
