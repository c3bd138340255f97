//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::client::ProxyPolicy;
use super::service;
use crate::error::{RatewindowError, Result};
use crate::ratelimit::Limiter;

/// HTTP server for the rate limit endpoints.
pub struct HttpServer<L: Limiter + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The limiter instance
    limiter: Arc<L>,
    /// How client addresses are derived
    proxy: ProxyPolicy,
}

impl<L: Limiter + 'static> HttpServer<L> {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, limiter: Arc<L>, trust_proxy_headers: bool) -> Self {
        Self {
            addr,
            limiter,
            proxy: ProxyPolicy {
                trust_headers: trust_proxy_headers,
            },
        }
    }

    /// The router this server serves.
    pub fn router(&self) -> Router {
        service::router(self.limiter.clone(), self.proxy)
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    /// Binding an address already in use fails with [`RatewindowError::Io`].
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            RatewindowError::Io(e)
        })?;
        self.run(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn run<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            window_secs = self.limiter.window().as_secs(),
            limit = self.limiter.limit(),
            trust_proxy_headers = self.proxy.trust_headers,
            "Starting HTTP server"
        );

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                RatewindowError::Server(e)
            })
    }
}
