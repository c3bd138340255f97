//! Request handlers for the status and admission endpoints.

use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::client::{ClientKey, ProxyPolicy};
use crate::ratelimit::{LimitError, Limiter, Usage};

/// Body returned when usage is reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageBody {
    /// Requests admitted in the current window
    pub current_cnt: u64,
    /// End of the current window, in unix seconds
    pub expiration: i64,
}

impl From<Usage> for UsageBody {
    fn from(usage: Usage) -> Self {
        Self {
            current_cnt: usage.count,
            expiration: usage.expiration,
        }
    }
}

/// Body returned when a request fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// What went wrong
    pub error: String,
}

/// JSON error response with the given status.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    let body = ErrorBody {
        error: message.to_string(),
    };
    (status, Json(body)).into_response()
}

/// State shared by all handlers.
pub(crate) struct ServiceState<L> {
    limiter: Arc<L>,
    proxy: ProxyPolicy,
}

impl<L> Clone for ServiceState<L> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            proxy: self.proxy,
        }
    }
}

impl<L> FromRef<ServiceState<L>> for ProxyPolicy {
    fn from_ref(state: &ServiceState<L>) -> Self {
        state.proxy
    }
}

/// Build the router serving `/` (usage) and `/ping` (admission).
pub fn router<L: Limiter + 'static>(limiter: Arc<L>, proxy: ProxyPolicy) -> Router {
    Router::new()
        .route("/", get(status_handler::<L>))
        .route("/ping", get(ping_handler::<L>))
        .with_state(ServiceState { limiter, proxy })
}

/// Report the caller's usage without consuming any allowance.
#[instrument(skip_all, fields(client = %client))]
async fn status_handler<L: Limiter>(
    State(state): State<ServiceState<L>>,
    client: ClientKey,
) -> Response {
    match state.limiter.check(client.as_str()).await {
        Ok(usage) => Json(UsageBody::from(usage)).into_response(),
        Err(e) => {
            error!(error = %e, "Usage check failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Admit the caller's request, or reject it with retry guidance.
#[instrument(skip_all, fields(client = %client))]
async fn ping_handler<L: Limiter>(
    State(state): State<ServiceState<L>>,
    client: ClientKey,
) -> Response {
    info!("Ping received");

    match state.limiter.take(client.as_str()).await {
        Ok(usage) => Json(UsageBody::from(usage)).into_response(),
        Err(LimitError::ReachLimit { count, expiration }) => {
            let now = state.limiter.now().timestamp();
            let retry_after = Usage { count, expiration }.retry_after(now);
            warn!(count, expiration, retry_after, "Request rejected, limit reached");

            let mut response =
                error_response(StatusCode::TOO_MANY_REQUESTS, "reach request limit");
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, retry_after.into());
            response
        }
        Err(e @ LimitError::Internal(_)) => {
            error!(error = %e, "Admission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::WindowLimiter;
    use chrono::Utc;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::extract::ConnectInfo;
    use axum::http::Request;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tower::ServiceExt;

    const TRUSTED: ProxyPolicy = ProxyPolicy {
        trust_headers: true,
    };

    /// Limiter whose store is always broken.
    struct BrokenLimiter;

    fn corrupt() -> LimitError {
        LimitError::Internal(StoreError::Data(
            serde_json::from_str::<u64>("corrupt").unwrap_err(),
        ))
    }

    #[async_trait]
    impl Limiter for BrokenLimiter {
        async fn check(&self, _key: &str) -> Result<Usage, LimitError> {
            Err(corrupt())
        }

        async fn take(&self, _key: &str) -> Result<Usage, LimitError> {
            Err(corrupt())
        }

        fn window(&self) -> Duration {
            Duration::from_secs(60)
        }

        fn limit(&self) -> u64 {
            60
        }
    }

    fn test_router(limit: u64) -> Router {
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(WindowLimiter::new(Duration::from_secs(60), limit, store));
        router(limiter, TRUSTED)
    }

    fn request(uri: &str, peer: &str) -> Request<Body> {
        let addr: SocketAddr = peer.parse().unwrap();
        Request::builder()
            .uri(uri)
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_zero_for_new_client() {
        let app = test_router(60);

        let response = app.oneshot(request("/", "10.0.0.1:4000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: UsageBody = json_body(response).await;
        assert_eq!(body.current_cnt, 0);
        let now = Utc::now().timestamp();
        assert!((now + 59..=now + 61).contains(&body.expiration));
    }

    #[tokio::test]
    async fn test_ping_counts_per_client() {
        let app = test_router(60);

        for expected in 1..=3 {
            let response = app
                .clone()
                .oneshot(request("/ping", "10.0.0.1:4000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body: UsageBody = json_body(response).await;
            assert_eq!(body.current_cnt, expected);
        }

        // Same client from another source port shares the bucket
        let response = app
            .clone()
            .oneshot(request("/", "10.0.0.1:5000"))
            .await
            .unwrap();
        let body: UsageBody = json_body(response).await;
        assert_eq!(body.current_cnt, 3);

        let response = app.oneshot(request("/", "10.0.0.2:4000")).await.unwrap();
        let body: UsageBody = json_body(response).await;
        assert_eq!(body.current_cnt, 0);
    }

    #[tokio::test]
    async fn test_ping_over_limit_returns_429() {
        let app = test_router(2);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("/ping", "10.0.0.1:4000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(request("/ping", "10.0.0.1:4000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let retry_after: u64 = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap();
        assert!(retry_after <= 60);

        let body: ErrorBody = json_body(response).await;
        assert_eq!(body.error, "reach request limit");
    }

    #[tokio::test]
    async fn test_retry_after_follows_limiter_clock() {
        let clock = Arc::new(ManualClock::at_timestamp(1_700_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = WindowLimiter::with_clock(Duration::from_secs(60), 1, store, clock.clone());
        let app = router(Arc::new(limiter), TRUSTED);

        let response = app
            .clone()
            .oneshot(request("/ping", "10.0.0.1:4000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("/ping", "10.0.0.1:4000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");

        clock.advance(Duration::from_secs(45));
        let response = app
            .oneshot(request("/ping", "10.0.0.1:4000"))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::RETRY_AFTER], "15");
    }

    #[tokio::test]
    async fn test_forwarded_client_is_limited_separately() {
        let app = test_router(1);

        let forwarded = |ip: &'static str| {
            let mut req = request("/ping", "127.0.0.1:4000");
            req.headers_mut()
                .insert("x-forwarded-for", ip.parse().unwrap());
            req
        };

        let response = app.clone().oneshot(forwarded("203.0.113.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(forwarded("203.0.113.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(forwarded("203.0.113.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_internal_failure_returns_500() {
        let app = router(Arc::new(BrokenLimiter), TRUSTED);

        for uri in ["/", "/ping"] {
            let response = app.clone().oneshot(request(uri, "10.0.0.1:4000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(response.headers().get(header::RETRY_AFTER).is_none());

            let body: ErrorBody = json_body(response).await;
            assert_eq!(body.error, "internal error");
        }
    }

    #[tokio::test]
    async fn test_missing_client_address_rejected() {
        let app = test_router(60);

        let request = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
