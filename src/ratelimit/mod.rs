//! Per-client admission control.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity (forwarded-for / real-ip / peer address)
//!     → IpRateLimiter::allow (token bucket per identity)
//!     → admitted: continue pipeline; denied: 429
//! ```
//!
//! # Design Decisions
//! - Continuous token refill computed from elapsed time, not discrete ticks
//! - Registry reads take a shared lock; first-time creation takes the
//!   exclusive lock with a double-check so a race never makes two buckets
//! - Eviction is by idle time, oldest first, so active clients keep their
//!   bucket state when the registry is trimmed

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::schema::RateLimitConfig;
use crate::observability::metrics;

/// Buckets idle at least this long are eligible for eviction.
const IDLE_CUTOFF: Duration = Duration::from_secs(60);

/// A token bucket with continuous refill.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity,
            last_refill: now,
            last_access: now,
        }
    }

    /// Refill from elapsed time (capped at capacity), then try to consume
    /// one token. Tokens are untouched on denial.
    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
        self.last_access = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn remaining(&self) -> u32 {
        self.tokens.max(0.0) as u32
    }
}

/// Per-client-identity rate limiter.
///
/// One bucket per identity, created on first sight. `allow` never fails;
/// it only returns the admission decision.
pub struct IpRateLimiter {
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    rate: f64,
    burst: f64,
    max_tracked: usize,
    cleanup_interval: Duration,
}

impl IpRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            rate: config.requests_per_second,
            burst: config.burst_size as f64,
            max_tracked: config.max_tracked_clients,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
        }
    }

    /// Check whether a request from `identity` is admitted, consuming one
    /// token if so.
    pub fn allow(&self, identity: &str) -> bool {
        let bucket = self.bucket(identity);
        let mut bucket = bucket.lock().expect("rate limiter bucket mutex poisoned");
        bucket.try_acquire(self.burst, self.rate)
    }

    /// Remaining whole tokens for `identity`, clamped at 0.
    ///
    /// Read-only: does not refill, so the value reflects the state as of the
    /// last admission check.
    pub fn remaining(&self, identity: &str) -> u32 {
        let buckets = self.buckets.read().expect("rate limiter registry poisoned");
        match buckets.get(identity) {
            Some(bucket) => bucket
                .lock()
                .expect("rate limiter bucket mutex poisoned")
                .remaining(),
            None => self.burst as u32,
        }
    }

    /// Number of identities currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets
            .read()
            .expect("rate limiter registry poisoned")
            .len()
    }

    fn bucket(&self, identity: &str) -> Arc<Mutex<TokenBucket>> {
        {
            let buckets = self.buckets.read().expect("rate limiter registry poisoned");
            if let Some(bucket) = buckets.get(identity) {
                return bucket.clone();
            }
        }

        let mut buckets = self.buckets.write().expect("rate limiter registry poisoned");
        // Double-check: another request may have created it between locks.
        if let Some(bucket) = buckets.get(identity) {
            return bucket.clone();
        }

        let bucket = Arc::new(Mutex::new(TokenBucket::new(self.burst)));
        buckets.insert(identity.to_string(), bucket.clone());
        bucket
    }

    /// Evict idle buckets once the registry exceeds its size threshold.
    ///
    /// Candidates are entries idle longer than [`IDLE_CUTOFF`]; they are
    /// removed oldest first until the registry is back under the threshold.
    /// Active clients keep their state.
    fn evict_idle(&self, now: Instant) {
        let mut buckets = self.buckets.write().expect("rate limiter registry poisoned");
        if buckets.len() <= self.max_tracked {
            return;
        }

        let mut idle: Vec<(String, Instant)> = buckets
            .iter()
            .filter_map(|(identity, bucket)| {
                let last_access = bucket
                    .lock()
                    .expect("rate limiter bucket mutex poisoned")
                    .last_access;
                (now.duration_since(last_access) >= IDLE_CUTOFF)
                    .then(|| (identity.clone(), last_access))
            })
            .collect();
        idle.sort_by_key(|(_, last_access)| *last_access);

        let excess = buckets.len() - self.max_tracked;
        let mut evicted = 0usize;
        for (identity, _) in idle.into_iter().take(excess) {
            buckets.remove(&identity);
            evicted += 1;
        }

        if evicted > 0 {
            metrics::record_buckets_evicted(evicted);
            tracing::info!(
                evicted,
                tracked = buckets.len(),
                "Evicted idle rate-limit buckets"
            );
        }
    }

    /// Periodic eviction loop. Exits when the shutdown signal fires.
    pub async fn run_cleanup(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.cleanup_interval);
        ticker.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = ticker.tick() => self.evict_idle(Instant::now()),
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Rate limiter cleanup task stopping");
                    break;
                }
            }
        }
    }
}
