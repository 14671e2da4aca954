//! Caching CORS proxy.
//!
//! Fetches caller-supplied URLs on behalf of browser clients, returns the
//! body with permissive cross-origin headers, and caches successful
//! responses on disk.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │               CACHING PROXY                   │
//!                    │                                               │
//!   GET /?url=…      │  ┌────────┐   ┌───────────┐   ┌───────────┐  │
//!   ─────────────────┼─▶│  http  │──▶│ ratelimit │──▶│   cache   │  │
//!                    │  │ server │   │ admission │   │  lookup   │  │
//!                    │  └────────┘   └───────────┘   └─────┬─────┘  │
//!                    │                                     │ miss   │
//!                    │                               ┌─────▼─────┐  │
//!   response         │  ┌────────┐   ┌───────────┐   │   fetch   │◀─┼── Upstream
//!   ◀────────────────┼──│ respond│◀──│   cache   │◀──│  bounded  │  │
//!                    │  │ + CORS │   │   store   │   │    GET    │  │
//!                    │  └────────┘   └───────────┘   └───────────┘  │
//!                    │                                               │
//!                    │  config · lifecycle · observability           │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use caching_proxy::cache::DiskCache;
use caching_proxy::config::load_config;
use caching_proxy::fetch::Fetcher;
use caching_proxy::http::HttpServer;
use caching_proxy::lifecycle::{self, Shutdown};
use caching_proxy::observability::metrics;
use caching_proxy::proxy::ProxyService;
use caching_proxy::ratelimit::IpRateLimiter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "caching_proxy={},tower_http=warn",
                    config.observability.log_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        bind_address = %config.listener.bind_address,
        cache_dir = %config.cache.dir,
        cache_ttl_secs = config.cache.ttl_secs,
        rate_limit_rps = config.rate_limit.requests_per_second,
        rate_limit_burst = config.rate_limit.burst_size,
        fetch_timeout_secs = config.fetch.timeout_secs,
        max_response_bytes = config.fetch.max_response_bytes,
        "Starting caching proxy"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The store is required for safe operation; failure here is fatal.
    let cache = Arc::new(DiskCache::open(&config.cache)?);
    let limiter = Arc::new(IpRateLimiter::new(&config.rate_limit));
    let fetcher = Fetcher::new(&config.fetch)?;
    let service = Arc::new(ProxyService::new(limiter.clone(), cache.clone(), fetcher));

    let shutdown = Arc::new(Shutdown::new());

    // Background maintenance: idle-bucket eviction and cache compaction.
    tokio::spawn(limiter.clone().run_cleanup(shutdown.subscribe()));
    tokio::spawn(cache.clone().run_compaction(shutdown.subscribe()));

    // SIGINT/SIGTERM fan out through the shutdown coordinator.
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            lifecycle::signal_received().await;
            shutdown.trigger();
        }
    });

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let server = HttpServer::new(&config, service);
    server.run(listener, shutdown.wait()).await?;

    // Make sure maintenance tasks stop even if the server exited on its own.
    shutdown.trigger();
    tracing::info!("Shutdown complete");
    Ok(())
}
