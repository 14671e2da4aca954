//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (the loader handles syntactic parsing)
//! - Validate value ranges (rates > 0, sizes > 0, addresses parseable)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ProxyConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic validation failure.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a valid socket address")]
    BindAddress(String),

    #[error("rate_limit.requests_per_second must be positive (got {0})")]
    RequestsPerSecond(f64),

    #[error("rate_limit.burst_size must be at least 1")]
    BurstSize,

    #[error("fetch.timeout_secs must be positive")]
    FetchTimeout,

    #[error("fetch.max_response_bytes must be positive")]
    MaxResponseBytes,

    #[error("cache.ttl_secs must be positive")]
    CacheTtl,

    #[error("observability.metrics_address {0:?} is not a valid socket address")]
    MetricsAddress(String),
}

/// Validate a configuration, collecting every failure.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.rate_limit.requests_per_second <= 0.0 {
        errors.push(ValidationError::RequestsPerSecond(
            config.rate_limit.requests_per_second,
        ));
    }
    if config.rate_limit.burst_size == 0 {
        errors.push(ValidationError::BurstSize);
    }

    if config.fetch.timeout_secs == 0 {
        errors.push(ValidationError::FetchTimeout);
    }
    if config.fetch.max_response_bytes == 0 {
        errors.push(ValidationError::MaxResponseBytes);
    }

    if config.cache.ttl_secs == 0 {
        errors.push(ValidationError::CacheTtl);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
