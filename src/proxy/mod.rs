//! Request orchestration.
//!
//! # Data Flow
//! ```text
//! (identity, target url)
//!     → admission gate (ratelimit)
//!     → url presence + validation (fetch)
//!     → cache lookup (cache)          → hit: respond from store
//!     → single-flight upstream fetch  → store → respond fresh
//! ```
//!
//! # Design Decisions
//! - Cache read errors degrade to a miss, write errors to a warning; a
//!   broken store never fails a request that the upstream can serve
//! - Concurrent misses for one URL share a single upstream fetch; the
//!   in-flight slot is released on completion or failure, and failures are
//!   never cached
//! - All shared state is constructed once and injected; no globals

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::cache::{cache_key, DiskCache};
use crate::fetch::{validate_url, FetchError, Fetcher};
use crate::observability::metrics;
use crate::ratelimit::IpRateLimiter;

/// Content type substituted when the upstream omits one.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Whether a response was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Why a request was rejected.
#[derive(Debug)]
pub enum RejectReason {
    /// Admission limiter denied the request.
    RateLimited,
    /// No `url` query parameter.
    MissingParameter,
    /// Target URL failed validation.
    InvalidUrl(String),
    /// Upstream fetch failed; the kind is kept for diagnostics.
    Upstream(Arc<FetchError>),
}

/// Terminal classification of one request.
#[derive(Debug)]
pub enum ProxyOutcome {
    Responded {
        body: Bytes,
        content_type: String,
        cache_status: CacheStatus,
    },
    Rejected(RejectReason),
}

type InflightResult = Result<(Bytes, String), Arc<FetchError>>;

/// The per-request decision pipeline, shared across all request tasks.
pub struct ProxyService {
    limiter: Arc<IpRateLimiter>,
    cache: Arc<DiskCache>,
    fetcher: Fetcher,
    inflight: DashMap<String, Arc<OnceCell<InflightResult>>>,
}

impl ProxyService {
    pub fn new(limiter: Arc<IpRateLimiter>, cache: Arc<DiskCache>, fetcher: Fetcher) -> Self {
        Self {
            limiter,
            cache,
            fetcher,
            inflight: DashMap::new(),
        }
    }

    /// The admission limiter, exposed for the remaining-tokens header.
    pub fn limiter(&self) -> &IpRateLimiter {
        &self.limiter
    }

    /// Run the full pipeline for one request.
    pub async fn handle(&self, identity: &str, target_url: Option<&str>) -> ProxyOutcome {
        if !self.limiter.allow(identity) {
            tracing::warn!(client = %identity, "Rate limit exceeded");
            metrics::record_rate_limited();
            return ProxyOutcome::Rejected(RejectReason::RateLimited);
        }

        let url = match target_url {
            Some(url) if !url.is_empty() => url,
            _ => return ProxyOutcome::Rejected(RejectReason::MissingParameter),
        };

        if let Err(e) = validate_url(url) {
            return ProxyOutcome::Rejected(RejectReason::InvalidUrl(e.to_string()));
        }

        match self.cache.get(url).await {
            Ok(Some((body, content_type))) => {
                return ProxyOutcome::Responded {
                    body,
                    content_type,
                    cache_status: CacheStatus::Hit,
                };
            }
            Ok(None) => {}
            Err(e) => {
                // Degrade to a miss; the upstream can still serve this.
                tracing::warn!(url = %url, error = %e, "Cache read failed, fetching upstream");
            }
        }

        match self.fetch_shared(url).await {
            Ok((body, content_type)) => ProxyOutcome::Responded {
                body,
                content_type,
                cache_status: CacheStatus::Miss,
            },
            Err(e) => {
                metrics::record_upstream_error(e.kind());
                ProxyOutcome::Rejected(RejectReason::Upstream(e))
            }
        }
    }

    /// Fetch `url`, deduplicating concurrent fetches for the same key.
    ///
    /// The first caller for a key performs the fetch and cache write; callers
    /// arriving while it runs await the same result. The slot is removed once
    /// settled so a later request after a failure retries fresh.
    async fn fetch_shared(&self, url: &str) -> InflightResult {
        let key = cache_key(url);
        let cell = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_init(|| self.fetch_and_store(url))
            .await
            .clone();

        // Only the cell we actually awaited is removed, so a slot recreated
        // by a later request is left alone.
        self.inflight
            .remove_if(&key, |_, entry| Arc::ptr_eq(entry, &cell));

        result
    }

    async fn fetch_and_store(&self, url: &str) -> InflightResult {
        let fetched = self.fetcher.fetch(url).await.map_err(Arc::new)?;
        tracing::debug!(url = %url, status = fetched.status, "Fetched upstream");

        let content_type = fetched
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        if let Err(e) = self.cache.put(url, &fetched.body, &content_type).await {
            // Non-fatal: the response is still served fresh.
            tracing::warn!(url = %url, error = %e, "Failed to cache response");
        }

        Ok((fetched.body, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{CacheConfig, FetchConfig, RateLimitConfig};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn service(burst: u32) -> ProxyService {
        let limiter = Arc::new(IpRateLimiter::new(&RateLimitConfig {
            requests_per_second: 0.001,
            burst_size: burst,
            max_tracked_clients: 100,
            cleanup_interval_secs: 600,
        }));
        let dir = std::env::temp_dir().join(format!("caching-proxy-test-{}", uuid::Uuid::new_v4()));
        let cache = Arc::new(
            DiskCache::open(&CacheConfig {
                dir: dir.to_string_lossy().into_owned(),
                ttl_secs: 60,
                compaction_interval_secs: 300,
            })
            .unwrap(),
        );
        let fetcher = Fetcher::new(&FetchConfig {
            timeout_secs: 5,
            max_response_bytes: 1024 * 1024,
        })
        .unwrap();
        ProxyService::new(limiter, cache, fetcher)
    }

    /// Origin that counts hits and responds after an optional delay.
    async fn spawn_counting_origin(
        body: &'static str,
        delay: Duration,
    ) -> (SocketAddr, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (addr, hits)
    }

    #[tokio::test]
    async fn missing_parameter_is_rejected() {
        let service = service(10);
        let outcome = service.handle("1.1.1.1", None).await;
        assert!(matches!(
            outcome,
            ProxyOutcome::Rejected(RejectReason::MissingParameter)
        ));

        let outcome = service.handle("1.1.1.1", Some("")).await;
        assert!(matches!(
            outcome,
            ProxyOutcome::Rejected(RejectReason::MissingParameter)
        ));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_fetching() {
        let service = service(10);
        let outcome = service.handle("1.1.1.1", Some("ftp://host/file")).await;
        assert!(matches!(
            outcome,
            ProxyOutcome::Rejected(RejectReason::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn rate_limit_rejects_before_any_work() {
        let service = service(1);
        let (addr, hits) = spawn_counting_origin("ok", Duration::ZERO).await;
        let url = format!("http://{addr}/");

        let first = service.handle("2.2.2.2", Some(&url)).await;
        assert!(matches!(first, ProxyOutcome::Responded { .. }));

        let second = service.handle("2.2.2.2", Some(&url)).await;
        assert!(matches!(
            second,
            ProxyOutcome::Rejected(RejectReason::RateLimited)
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn miss_then_hit_serves_cached_body() {
        let service = service(10);
        let (addr, hits) = spawn_counting_origin(r#"{"message":"hello"}"#, Duration::ZERO).await;
        let url = format!("http://{addr}/data");

        match service.handle("3.3.3.3", Some(&url)).await {
            ProxyOutcome::Responded {
                body,
                content_type,
                cache_status,
            } => {
                assert_eq!(cache_status, CacheStatus::Miss);
                assert_eq!(body.as_ref(), br#"{"message":"hello"}"#);
                assert_eq!(content_type, "application/json");
            }
            other => panic!("expected response, got {other:?}"),
        }

        match service.handle("3.3.3.3", Some(&url)).await {
            ProxyOutcome::Responded {
                body, cache_status, ..
            } => {
                assert_eq!(cache_status, CacheStatus::Hit);
                assert_eq!(body.as_ref(), br#"{"message":"hello"}"#);
            }
            other => panic!("expected response, got {other:?}"),
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upstream_failure_is_classified() {
        let service = service(10);
        // Port from a dropped listener refuses connections.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let outcome = service.handle("4.4.4.4", Some(&format!("http://{addr}/"))).await;
        match outcome {
            ProxyOutcome::Rejected(RejectReason::Upstream(e)) => {
                assert!(matches!(*e, FetchError::Network(_)));
            }
            other => panic!("expected upstream rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let service = Arc::new(service(100));
        let (addr, hits) = spawn_counting_origin("shared", Duration::from_millis(200)).await;
        let url = format!("http://{addr}/single-flight");

        let mut handles = Vec::new();
        for i in 0..5 {
            let service = service.clone();
            let url = url.clone();
            handles.push(tokio::spawn(async move {
                service.handle(&format!("5.5.5.{i}"), Some(&url)).await
            }));
        }

        for handle in handles {
            let outcome = handle.await.unwrap();
            match outcome {
                ProxyOutcome::Responded { body, .. } => assert_eq!(body.as_ref(), b"shared"),
                other => panic!("expected response, got {other:?}"),
            }
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_content_type_defaults_to_octet_stream() {
        let service = service(10);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let response =
                        "HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nraw";
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        match service.handle("6.6.6.6", Some(&format!("http://{addr}/"))).await {
            ProxyOutcome::Responded { content_type, .. } => {
                assert_eq!(content_type, DEFAULT_CONTENT_TYPE);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }
}
