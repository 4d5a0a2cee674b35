//! Middlewares shipped with the gateway.

pub mod headers;
pub mod logging;
pub mod node_selector;
pub mod rate_limit;
pub mod request_id;

use crate::middleware::MiddlewareRegistry;

/// Register every built-in middleware under its configuration name.
pub fn register_defaults(registry: &mut MiddlewareRegistry) {
    registry.register(headers::NAME, headers::factory);
    registry.register(logging::NAME, logging::factory);
    registry.register(node_selector::NAME, node_selector::factory);
    registry.register(rate_limit::NAME, rate_limit::factory);
    registry.register(request_id::NAME, request_id::factory);
}
