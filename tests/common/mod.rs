//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use caching_proxy::cache::DiskCache;
use caching_proxy::config::ProxyConfig;
use caching_proxy::fetch::Fetcher;
use caching_proxy::http::HttpServer;
use caching_proxy::proxy::ProxyService;
use caching_proxy::ratelimit::IpRateLimiter;

/// Build a config suitable for tests: temp cache dir, generous fetch bounds.
pub fn test_config(burst: u32) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.cache.dir = std::env::temp_dir()
        .join(format!("caching-proxy-it-{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();
    config.rate_limit.requests_per_second = 0.001;
    config.rate_limit.burst_size = burst;
    config.fetch.timeout_secs = 5;
    config
}

/// Construct the full pipeline and serve it on an ephemeral port.
pub async fn spawn_proxy(config: ProxyConfig) -> SocketAddr {
    let cache = Arc::new(DiskCache::open(&config.cache).unwrap());
    let limiter = Arc::new(IpRateLimiter::new(&config.rate_limit));
    let fetcher = Fetcher::new(&config.fetch).unwrap();
    let service = Arc::new(ProxyService::new(limiter, cache, fetcher));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(&config, service);
    tokio::spawn(async move {
        server
            .run(listener, std::future::pending())
            .await
            .unwrap();
    });
    addr
}

/// Start a mock origin that returns a fixed response and counts hits.
pub async fn start_mock_origin(
    body: &'static str,
    content_type: &'static str,
) -> (SocketAddr, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::spawn(async move {
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    content_type,
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

/// A port with nothing listening on it.
pub async fn unreachable_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
