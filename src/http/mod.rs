//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, body limit)
//!     → proxy::ProxyRouter::dispatch (current generation)
//!     → Send to client
//! ```

pub mod server;

pub use server::HttpServer;
