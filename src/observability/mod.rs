//! Observability subsystem.
//!
//! # Responsibilities
//! - Metrics recording helpers used across components
//! - Optional Prometheus exposition endpoint
//!
//! Logging is initialized in `main` via `tracing-subscriber`; request-level
//! tracing comes from `tower_http::trace::TraceLayer`.

pub mod metrics;
