//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, method, content-type)
//!     → router.rs (host check, ordered route scan)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched endpoint or no match (404)
//!
//! Route Compilation (on every config build):
//!     EndpointConfig[]
//!     → PathPattern + method + protocol matchers
//!     → Inserted in specificity order
//!     → Frozen inside the ProxyRouter generation
//! ```
//!
//! # Design Decisions
//! - Routes compiled per config generation, immutable at runtime
//! - No regex in hot path (exact and prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use matcher::{HostMatcher, PathPattern};
pub use router::Router;
