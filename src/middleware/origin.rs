use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::server::AppState;
use crate::services::RequestOrigin;

/// Client address of a request. `X-Forwarded-For` is honoured only when the
/// deployment sits behind a trusted proxy, and then only its rightmost entry:
/// the one that proxy appended. Entries to its left are client-supplied.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> Option<String> {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return Some(ip.to_string());
        }
    }
    peer.map(|addr| addr.ip().to_string())
}

pub fn origin_from_parts(parts: &Parts, trust_forwarded_for: bool) -> RequestOrigin {
    let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    RequestOrigin {
        ip_address: client_ip(&parts.headers, peer, trust_forwarded_for),
        user_agent: parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequestOrigin {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(origin_from_parts(parts, state.config.api.trust_forwarded_for))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_needs_trust() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(peer), true).as_deref(), Some("10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(peer), false).as_deref(), Some("10.0.0.1"));
        assert_eq!(client_ip(&HeaderMap::new(), None, true), None);
    }

    #[test]
    fn spoofed_leftmost_entries_are_ignored() {
        let peer: SocketAddr = "10.0.0.2:5000".parse().unwrap();
        for spoofed in ["198.51.100.1", "198.51.100.2, 198.51.100.3"] {
            let mut headers = HeaderMap::new();
            let value = format!("{}, 203.0.113.9", spoofed);
            headers.insert("x-forwarded-for", HeaderValue::from_str(&value).unwrap());
            assert_eq!(client_ip(&headers, Some(peer), true).as_deref(), Some("203.0.113.9"));
        }

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9,"));
        assert_eq!(client_ip(&headers, Some(peer), true).as_deref(), Some("10.0.0.2"));
    }
}
