//! Reverse-proxy gateway library.
//!
//! Requests are matched to endpoints by path, method, host and protocol, then
//! forwarded through a per-endpoint pipeline of middlewares, a retry
//! coordinator and a node directory fed by service discovery. The whole
//! routing state is rebuilt and swapped atomically when the configuration
//! changes.

// Core subsystems
pub mod config;
pub mod http;
pub mod proxy;
pub mod routing;

// Traffic management
pub mod discovery;
pub mod health;
pub mod load_balancer;
pub mod middleware;
pub mod transport;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::{GatewayConfig, ProxyConfig};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{ProxyBuilder, ProxyRouter, SharedProxy};
