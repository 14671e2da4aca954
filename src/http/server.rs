//! HTTP server setup and request handling.
//!
//! # Responsibilities
//! - Create the Axum router and wire middleware (CORS, request ID, tracing)
//! - Extract client identity and the target URL from each request
//! - Map orchestrator outcomes onto statuses, headers, and JSON bodies
//! - Serve with graceful shutdown

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::response::{
    error_response, proxied_response, rate_limited_response, X_RATELIMIT_REMAINING,
};
use crate::observability::metrics;
use crate::proxy::{ProxyOutcome, ProxyService, RejectReason};

/// Application state injected into handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<ProxyService>,
}

/// HTTP server for the caching proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server around an orchestrator.
    pub fn new(config: &ProxyConfig, service: Arc<ProxyService>) -> Self {
        let router = Self::build_router(config, AppState { service });
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(Any)
            .max_age(Duration::from_secs(86_400));

        // Overall request deadline sits above the fetch timeout so an
        // in-flight fetch is abandoned rather than held past it.
        let deadline = Duration::from_secs(config.fetch.timeout_secs + 5);

        Router::new()
            .route("/", get(proxy_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(
                tower::ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(deadline))
                    .layer(middleware::from_fn(preflight_status))
                    .layer(cors),
            )
    }

    /// Run the server until `shutdown` resolves, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler: identity → orchestrator → response mapping.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let start = Instant::now();
    let identity = client_identity(&headers, addr);
    let target_url = params.get("url").map(String::as_str);

    let outcome = state.service.handle(&identity, target_url).await;

    let mut response = match outcome {
        ProxyOutcome::Responded {
            body,
            content_type,
            cache_status,
        } => {
            metrics::record_request(200, cache_status.as_str(), start);
            tracing::info!(
                client = %identity,
                url = target_url.unwrap_or(""),
                cache = cache_status.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Request served"
            );
            proxied_response(body, &content_type, cache_status)
        }
        ProxyOutcome::Rejected(reason) => {
            let response = match reason {
                RejectReason::RateLimited => rate_limited_response(),
                RejectReason::MissingParameter => error_response(
                    StatusCode::BAD_REQUEST,
                    "missing required 'url' parameter",
                ),
                RejectReason::InvalidUrl(message) => {
                    error_response(StatusCode::BAD_REQUEST, message)
                }
                RejectReason::Upstream(e) => {
                    error_response(StatusCode::BAD_GATEWAY, format!("failed to fetch URL: {e}"))
                }
            };
            metrics::record_request(response.status().as_u16(), "none", start);
            tracing::info!(
                client = %identity,
                url = target_url.unwrap_or(""),
                status = response.status().as_u16(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Request rejected"
            );
            response
        }
    };

    // The remaining budget accompanies every admitted request, not only
    // successes.
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        let remaining = state.service.limiter().remaining(&identity);
        response
            .headers_mut()
            .insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    }

    response
}

/// Normalize CORS preflight responses to 204 No Content.
///
/// The CORS layer answers OPTIONS requests itself with a 200 and an empty
/// body; this runs outside it and rewrites the status.
async fn preflight_status(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

async fn health_handler() -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        r#"{"status":"ok"}"#,
    )
        .into_response()
}

/// Derive the client identity for rate limiting.
///
/// Prefers the first hop of `X-Forwarded-For`, then `X-Real-IP`, then the
/// transport peer address.
fn client_identity(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return first.to_string();
        }
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return real_ip.to_string();
    }

    peer.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "198.51.100.7:44312".parse().unwrap()
    }

    #[test]
    fn identity_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1, 10.0.0.2"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.1"));
        assert_eq!(client_identity(&headers, peer()), "203.0.113.9");
    }

    #[test]
    fn identity_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.1"));
        assert_eq!(client_identity(&headers, peer()), "192.0.2.1");
    }

    #[test]
    fn identity_falls_back_to_peer_address() {
        assert_eq!(client_identity(&HeaderMap::new(), peer()), "198.51.100.7");
    }

    #[test]
    fn empty_forwarded_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(client_identity(&headers, peer()), "198.51.100.7");
    }
}
