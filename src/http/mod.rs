//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, CORS)
//!     → proxy handler (identity extraction, query parsing)
//!     → [orchestrator decides: cached / fetched / rejected]
//!     → response.rs (status + headers + JSON error bodies)
//!     → Send to client
//! ```

pub mod response;
pub mod server;

pub use server::HttpServer;
