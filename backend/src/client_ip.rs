//! Resolves the caller's address once per request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::AppState;

/// Client address as used for rate limiting and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn unknown() -> Self {
        ClientIp("unknown".to_string())
    }

    /// Address as seen by the outermost of `trusted_hops` proxies.
    ///
    /// Each trusted proxy appends the address it received the request from,
    /// so only the rightmost `trusted_hops` entries of `X-Forwarded-For` are
    /// reliable. Anything further left is client-controlled.
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_hops: usize) -> Self {
        if trusted_hops > 0 {
            let hops: Vec<&str> = headers
                .get_all("x-forwarded-for")
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .collect();
            let index = hops.len().saturating_sub(trusted_hops);
            if let Some(ip) = hops.get(index) {
                return ClientIp(ip.to_string());
            }
        }

        peer.map(|addr| ClientIp(addr.ip().to_string()))
            .unwrap_or_else(Self::unknown)
    }
}

impl std::fmt::Display for ClientIp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Middleware that attaches [`ClientIp`] to the request.
pub async fn client_ip(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = ClientIp::resolve(request.headers(), peer, state.config.server.trusted_proxies);

    request.extensions_mut().insert(ip);
    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ClientIp>()
            .cloned()
            .unwrap_or_else(ClientIp::unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", value.parse().unwrap());
        headers
    }

    #[test]
    fn test_single_trusted_hop_takes_rightmost() {
        let ip = ClientIp::resolve(&forwarded("10.9.3.1, 198.51.100.7"), None, 1);
        assert_eq!(ip, ClientIp("198.51.100.7".to_string()));
    }

    #[test]
    fn test_spoofed_left_hops_do_not_change_ip() {
        let first = ClientIp::resolve(&forwarded("10.9.1.1, 198.51.100.7"), None, 1);
        let second = ClientIp::resolve(&forwarded("10.9.2.1, 198.51.100.7"), None, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_two_trusted_hops() {
        let ip = ClientIp::resolve(&forwarded("1.2.3.4, 203.0.113.7, 10.0.0.2"), None, 2);
        assert_eq!(ip.to_string(), "203.0.113.7");
    }

    #[test]
    fn test_more_hops_than_entries_takes_leftmost() {
        let ip = ClientIp::resolve(&forwarded("203.0.113.7"), None, 3);
        assert_eq!(ip.to_string(), "203.0.113.7");
    }

    #[test]
    fn test_forwarded_ignored_without_trust() {
        let peer: SocketAddr = "192.0.2.10:5555".parse().unwrap();
        let ip = ClientIp::resolve(&forwarded("203.0.113.7"), Some(peer), 0);
        assert_eq!(ip.to_string(), "192.0.2.10");
    }

    #[test]
    fn test_peer_without_forwarded_header() {
        let peer: SocketAddr = "192.0.2.10:5555".parse().unwrap();
        let ip = ClientIp::resolve(&HeaderMap::new(), Some(peer), 1);
        assert_eq!(ip.to_string(), "192.0.2.10");
    }

    #[test]
    fn test_unknown_without_any_source() {
        assert_eq!(ClientIp::resolve(&HeaderMap::new(), None, 1), ClientIp::unknown());
    }
}
