//! URL validation and bounded upstream fetching.
//!
//! # Responsibilities
//! - Reject non-http(s) and structurally invalid URLs before any network I/O
//! - Issue the upstream GET with a hard timeout and a redirect cap
//! - Bound response size twice: declared Content-Length up front, then the
//!   actual byte count while streaming
//!
//! # Design Decisions
//! - Scheme check is a security boundary: javascript:, data:, file: and
//!   friends must never reach the transport
//! - Errors are a closed taxonomy so the orchestrator can map each kind to a
//!   client-facing status

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::schema::FetchConfig;

/// User agent attached to every outbound request.
pub const USER_AGENT: &str = concat!("caching-proxy/", env!("CARGO_PKG_VERSION"));

/// Maximum redirects followed before the fetch fails.
const MAX_REDIRECTS: usize = 10;

/// Errors that can occur while validating or fetching an upstream URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL is empty, unparseable, or has no host.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parses but its scheme is not http or https.
    #[error("URL scheme must be http or https")]
    InvalidScheme,

    /// Upstream did not respond within the configured timeout.
    #[error("upstream request timed out")]
    Timeout,

    /// Redirect chain exceeded the cap.
    #[error("too many redirects (limit {MAX_REDIRECTS})")]
    TooManyRedirects,

    /// Declared or actual body size exceeds the configured maximum.
    #[error("response exceeds maximum allowed size ({limit} bytes)")]
    ResponseTooLarge { limit: u64 },

    /// Connection refused, DNS failure, protocol error, etc.
    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// Short stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl(_) => "invalid_url",
            FetchError::InvalidScheme => "invalid_scheme",
            FetchError::Timeout => "timeout",
            FetchError::TooManyRedirects => "too_many_redirects",
            FetchError::ResponseTooLarge { .. } => "response_too_large",
            FetchError::Network(_) => "network",
        }
    }
}

/// Outcome of a successful upstream fetch.
#[derive(Debug)]
pub struct FetchResult {
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
}

/// Validate that `raw_url` is an absolute http(s) URL with a host.
///
/// Checks run in order: non-empty, parseable, allowed scheme, non-empty host.
pub fn validate_url(raw_url: &str) -> Result<Url, FetchError> {
    if raw_url.is_empty() {
        return Err(FetchError::InvalidUrl("empty URL".to_string()));
    }

    let parsed = Url::parse(raw_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(FetchError::InvalidScheme);
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(FetchError::InvalidUrl("missing host".to_string()));
    }

    Ok(parsed)
}

/// Bounded upstream HTTP client.
pub struct Fetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            max_bytes: config.max_response_bytes,
        })
    }

    /// Fetch `raw_url`, validating it first.
    ///
    /// The body is streamed and the transfer aborted as soon as the byte
    /// budget is exceeded, so a lying or chunked upstream cannot stream past
    /// the limit.
    pub async fn fetch(&self, raw_url: &str) -> Result<FetchResult, FetchError> {
        let url = validate_url(raw_url)?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "*/*")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        // Fail fast on a declared oversized body, before reading any of it.
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(FetchError::ResponseTooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            if body.len() as u64 + chunk.len() as u64 > self.max_bytes {
                // Dropping the stream aborts the transfer.
                return Err(FetchError::ResponseTooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResult {
            status,
            body: body.freeze(),
            content_type,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_redirect() {
        FetchError::TooManyRedirects
    } else {
        FetchError::Network(e.to_string())
    }
}
