//! Client identification for incoming requests.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use tracing::debug;

use super::service::error_response;

const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Whether forwarding headers set by a reverse proxy are believed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyPolicy {
    /// Read `X-Real-IP` / `X-Forwarded-For` before the peer address
    pub trust_headers: bool,
}

/// The key a request is rate limited under: the client's IP address in
/// canonical textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Derive the key from request headers and the peer address.
    ///
    /// With trusted headers, `X-Real-IP` wins over the first `X-Forwarded-For`
    /// hop; values that are not IP addresses are ignored. The peer address is
    /// the fallback.
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, policy: ProxyPolicy) -> Option<Self> {
        let from_headers = policy
            .trust_headers
            .then(|| header_ip(headers, X_REAL_IP).or_else(|| header_ip(headers, X_FORWARDED_FOR)))
            .flatten();

        from_headers
            .or_else(|| peer.map(|addr| addr.ip()))
            .map(|ip| Self(ip.to_canonical().to_string()))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First address listed in header `name`, if it parses.
fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    let value = headers.get(name)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    match first.parse() {
        Ok(ip) => Some(ip),
        Err(_) => {
            debug!(header = name, value = first, "Ignoring unparsable client address");
            None
        }
    }
}

impl<S> FromRequestParts<S> for ClientKey
where
    ProxyPolicy: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let policy = ProxyPolicy::from_ref(state);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        ClientKey::resolve(&parts.headers, peer, policy).ok_or_else(|| {
            error_response(StatusCode::BAD_REQUEST, "unable to determine client address")
        })
    }
}
