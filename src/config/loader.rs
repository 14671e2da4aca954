//! Configuration loading from the environment.

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Parse { var: &'static str, value: String },

    #[error("validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from environment variables and validate it.
///
/// Unset variables fall back to defaults; set-but-unparseable values are an
/// error rather than a silent fallback.
pub fn load_config() -> Result<ProxyConfig, ConfigError> {
    let mut config = ProxyConfig::default();

    if let Some(port) = env_var("PORT") {
        // PORT overrides only the port half of the bind address.
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse("PORT", &port)?;
        config.listener.bind_address = format!("{host}:{port}");
    }
    if let Some(addr) = env_var("BIND_ADDRESS") {
        config.listener.bind_address = addr;
    }

    if let Some(dir) = env_var("CACHE_DIR") {
        config.cache.dir = dir;
    }
    if let Some(ttl) = env_var("CACHE_TTL_SECS") {
        config.cache.ttl_secs = parse("CACHE_TTL_SECS", &ttl)?;
    }
    if let Some(interval) = env_var("CACHE_COMPACTION_INTERVAL_SECS") {
        config.cache.compaction_interval_secs =
            parse("CACHE_COMPACTION_INTERVAL_SECS", &interval)?;
    }

    if let Some(rps) = env_var("RATE_LIMIT_RPS") {
        config.rate_limit.requests_per_second = parse("RATE_LIMIT_RPS", &rps)?;
    }
    if let Some(burst) = env_var("RATE_LIMIT_BURST") {
        config.rate_limit.burst_size = parse("RATE_LIMIT_BURST", &burst)?;
    }
    if let Some(max) = env_var("RATE_LIMIT_MAX_CLIENTS") {
        config.rate_limit.max_tracked_clients = parse("RATE_LIMIT_MAX_CLIENTS", &max)?;
    }

    if let Some(timeout) = env_var("FETCH_TIMEOUT_SECS") {
        config.fetch.timeout_secs = parse("FETCH_TIMEOUT_SECS", &timeout)?;
    }
    if let Some(max) = env_var("MAX_RESPONSE_SIZE") {
        config.fetch.max_response_bytes = parse("MAX_RESPONSE_SIZE", &max)?;
    }

    if let Some(level) = env_var("LOG_LEVEL") {
        config.observability.log_level = level;
    }
    if let Some(enabled) = env_var("METRICS_ENABLED") {
        config.observability.metrics_enabled = parse("METRICS_ENABLED", &enabled)?;
    }
    if let Some(addr) = env_var("METRICS_ADDRESS") {
        config.observability.metrics_address = addr;
    }

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Parse {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = ProxyConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse::<u64>("CACHE_TTL_SECS", "not-a-number").is_err());
        assert!(parse::<u64>("CACHE_TTL_SECS", "60").is_ok());
    }
}
