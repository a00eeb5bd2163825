//! Source filtering for the switch webhook.
//!
//! Deliveries must originate inside the switch operator's network. Before
//! the payload is even parsed, the caller address is resolved (from the
//! `x-forwarded-for` chain behind one trusted proxy, falling back to the
//! socket peer) and checked against the configured CIDR allowlist.

use std::net::{IpAddr, SocketAddr};

use axum::extract::connect_info::ConnectInfo;
use axum::extract::State;
use axum::http::{Extensions, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::AllowedIps;

/// Proxy hops in front of this service that append to `x-forwarded-for`.
/// The entry this many positions from the right is the real caller;
/// anything further left is caller-controlled and ignored.
const TRUSTED_PROXY_HOPS: usize = 1;

/// Webhook guard, applied with `axum::middleware::from_fn_with_state`.
pub async fn filter_webhook_source<B>(
    State(allowed): State<AllowedIps>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    if matches!(allowed, AllowedIps::Any) {
        return next.run(request).await;
    }

    let source = source_ip(request.headers(), request.extensions());
    match source {
        Some(ip) if allowed.permits(ip) => next.run(request).await,
        _ => {
            tracing::warn!(source = ?source, "rejected webhook delivery from unlisted source");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

fn source_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    forwarded_caller(headers)
        .or_else(|| extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0.ip()))
}

fn forwarded_caller(headers: &HeaderMap) -> Option<IpAddr> {
    let chain: Vec<IpAddr> = headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .filter_map(|entry| parse_hop(entry.trim()))
        .collect();

    // A chain shorter than the trusted hop count carries no verifiable
    // caller address at all.
    chain
        .len()
        .checked_sub(1 + TRUSTED_PROXY_HOPS)
        .and_then(|index| chain.get(index))
        .copied()
}

fn parse_hop(entry: &str) -> Option<IpAddr> {
    entry
        .parse::<IpAddr>()
        .ok()
        .or_else(|| entry.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;
    use axum::middleware::from_fn_with_state;
    use axum::routing::post;
    use axum::Router;
    use ipnet::IpNet;
    use tower::ServiceExt;

    fn switch_network() -> AllowedIps {
        AllowedIps::Cidrs(vec!["203.0.113.0/24".parse::<IpNet>().unwrap()])
    }

    fn guarded_app(allowed: AllowedIps) -> Router {
        Router::new()
            .route("/webhook/transfers", post(|| async { StatusCode::OK }))
            .layer(from_fn_with_state(allowed, filter_webhook_source))
    }

    fn delivery(xff: Option<&'static str>) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/webhook/transfers")
            .body(Body::empty())
            .unwrap();
        if let Some(chain) = xff {
            request
                .headers_mut()
                .insert("x-forwarded-for", HeaderValue::from_static(chain));
        }
        request
    }

    #[test]
    fn test_forwarded_caller_skips_trusted_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.10, 198.51.100.7"),
        );
        assert_eq!(
            forwarded_caller(&headers),
            Some(IpAddr::from([203, 0, 113, 10]))
        );
    }

    #[test]
    fn test_forwarded_caller_ignores_spoofable_prefix() {
        // The caller can prepend anything; only the entry behind the
        // trusted hop counts.
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.0.0.1, 203.0.113.10, 198.51.100.7"),
        );
        assert_eq!(
            forwarded_caller(&headers),
            Some(IpAddr::from([203, 0, 113, 10]))
        );
    }

    #[test]
    fn test_short_chain_yields_no_caller() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.10"));
        assert_eq!(forwarded_caller(&headers), None);
    }

    #[test]
    fn test_hop_entry_may_carry_a_port() {
        assert_eq!(
            parse_hop("203.0.113.10:4431"),
            Some(IpAddr::from([203, 0, 113, 10]))
        );
    }

    #[tokio::test]
    async fn test_listed_source_passes() {
        let response = guarded_app(switch_network())
            .oneshot(delivery(Some("203.0.113.55, 198.51.100.7")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unlisted_source_is_forbidden() {
        let response = guarded_app(switch_network())
            .oneshot(delivery(Some("198.51.100.55, 198.51.100.7")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unresolvable_source_is_forbidden() {
        let response = guarded_app(switch_network())
            .oneshot(delivery(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_open_allowlist_passes_everything() {
        let response = guarded_app(AllowedIps::Any)
            .oneshot(delivery(Some("198.51.100.55, 198.51.100.7")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_socket_peer_used_without_forwarding_header() {
        let mut request = delivery(None);
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 44], 8080))));

        let response = guarded_app(switch_network()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
