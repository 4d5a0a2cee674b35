//! Proxy composition root.
//!
//! # Data Flow
//! ```text
//! GatewayConfig
//!     → ProxyBuilder::build
//!         per endpoint: RetryPolicy, middlewares, NodeDirectory (discovery),
//!         NodeTransport → RetryCoordinator → middleware chain
//!     → ProxyRouter (one immutable generation)
//!     → SharedProxy::store (atomic swap on reload)
//!     → StaticDiscovery::apply_config (file-configured services)
//!
//! Request:
//!     ProxyRouter::dispatch → route lookup → buffer body
//!     → endpoint transport → response or mapped error status
//! ```
//!
//! # Design Decisions
//! - A generation is built completely before it is published; any endpoint
//!   error discards the whole generation and the previous one keeps serving
//! - Requests hold their generation alive until they finish
//! - HTTP clients live in the builder so connection pools survive reloads

pub mod endpoint;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use thiserror::Error;

use crate::config::{ChangeHandler, GatewayConfig, Protocol, ProxyConfig};
use crate::config::DiscoveryConfig;
use crate::discovery::{DiscoveryError, DiscoveryRegistry, StaticDiscovery, WatchHub};
use crate::load_balancer::NodeDirectory;
use crate::middleware::{MiddlewareError, MiddlewareRegistry};
use crate::observability::metrics;
use crate::resilience::ConditionError;
use crate::routing::{HostMatcher, Router};
use crate::transport::client::{build_client, HttpClient};
use crate::transport::forwarding::append_forwarded_for;
use crate::transport::RequestOptions;

pub use endpoint::EndpointHandle;

/// Default limit for buffered request bodies.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Endpoint build failure; the whole generation is rejected.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("endpoint '{path}': invalid retry condition")]
    Condition {
        path: String,
        #[source]
        source: ConditionError,
    },

    #[error("endpoint '{path}': middleware")]
    Middleware {
        path: String,
        #[source]
        source: MiddlewareError,
    },

    #[error("endpoint '{path}': backend resolution")]
    Discovery {
        path: String,
        #[source]
        source: DiscoveryError,
    },
}

/// Current proxy generation, swapped on every successful reload.
pub type SharedProxy = Arc<ArcSwap<ProxyRouter>>;

/// Long-lived build context shared by every generation.
#[derive(Clone)]
pub struct ProxyBuilder {
    pub(crate) middlewares: Arc<MiddlewareRegistry>,
    pub(crate) discovery: Arc<DiscoveryRegistry>,
    pub(crate) hub: WatchHub,
    pub(crate) http_client: HttpClient,
    pub(crate) grpc_client: HttpClient,
    configured_services: Option<Arc<StaticDiscovery>>,
    max_body_bytes: usize,
}

impl ProxyBuilder {
    pub fn new(middlewares: MiddlewareRegistry, discovery: DiscoveryRegistry) -> Self {
        Self {
            middlewares: Arc::new(middlewares),
            discovery: Arc::new(discovery),
            hub: WatchHub::new(),
            http_client: build_client(Protocol::Http),
            grpc_client: build_client(Protocol::Grpc),
            configured_services: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Provider that receives the `[discovery.services]` section.
    pub fn with_configured_services(mut self, provider: Arc<StaticDiscovery>) -> Self {
        self.configured_services = Some(provider);
        self
    }

    /// Push file-configured services to their provider, if one is set.
    pub fn publish_services(&self, config: &DiscoveryConfig) {
        if let Some(provider) = &self.configured_services {
            provider.apply_config(config);
        }
    }

    /// Discovery fan-out shared by all generations.
    pub fn hub(&self) -> &WatchHub {
        &self.hub
    }

    /// Build one complete generation from `config`.
    pub fn build(&self, config: &GatewayConfig) -> Result<ProxyRouter, BuildError> {
        let mut router = Router::new(HostMatcher::new(&config.hosts));

        for endpoint in &config.endpoints {
            let handle = Arc::new(endpoint::build_endpoint(self, &config.middlewares, endpoint)?);
            router.add(
                &endpoint.path,
                &endpoint.method,
                endpoint.protocol == Protocol::Grpc,
                handle,
            );
        }

        tracing::info!(
            gateway = %config.name,
            endpoints = router.len(),
            "Proxy router built"
        );

        Ok(ProxyRouter {
            name: config.name.clone(),
            router,
            max_body_bytes: self.max_body_bytes,
        })
    }
}

impl std::fmt::Debug for ProxyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyBuilder")
            .field("middlewares", &self.middlewares)
            .field("discovery", &self.discovery)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

/// One immutable routing generation.
#[derive(Debug)]
pub struct ProxyRouter {
    name: String,
    router: Router<Arc<EndpointHandle>>,
    max_body_bytes: usize,
}

impl ProxyRouter {
    /// Router with no endpoints; every request is a 404.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            router: Router::new(HostMatcher::default()),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint_count(&self) -> usize {
        self.router.len()
    }

    /// Node directories of every endpoint, in match order.
    pub fn directories(&self) -> Vec<Arc<NodeDirectory>> {
        self.router.targets().map(|handle| handle.directory.clone()).collect()
    }

    /// Route `request` and forward it through its endpoint pipeline.
    pub async fn dispatch(&self, request: Request<Body>, client: Option<SocketAddr>) -> Response<Body> {
        let start = Instant::now();
        let method = request.method().to_string();

        let Some(handle) = self.router.lookup(&request).cloned() else {
            tracing::warn!(method = %method, path = %request.uri().path(), "No route matched");
            metrics::record_request("none", &method, StatusCode::NOT_FOUND.as_u16(), start);
            return text_response(StatusCode::NOT_FOUND, "No matching route found");
        };

        let (mut parts, body) = request.into_parts();
        let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(endpoint = %handle.path, error = %e, "Request body rejected");
                metrics::record_request(&handle.path, &method, StatusCode::PAYLOAD_TOO_LARGE.as_u16(), start);
                return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
        };
        if let Some(addr) = client {
            append_forwarded_for(&mut parts.headers, addr.ip());
        }

        let mut opts = RequestOptions::new(&handle.path, handle.timeout);
        let response = match handle.transport.round_trip(Request::from_parts(parts, body), &mut opts).await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status();
                tracing::warn!(
                    endpoint = %handle.path,
                    attempts = opts.attempt,
                    error = %e,
                    status = status.as_u16(),
                    "Request failed"
                );
                text_response(status, &e.to_string())
            }
        };

        metrics::record_request(&handle.path, &method, response.status().as_u16(), start);
        response
    }
}

fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response
}

/// Change handler that builds a new generation and swaps it in.
///
/// A failed build leaves the current generation and the configured
/// discovery services untouched and reports the error so the watcher does
/// not commit the new content hash.
pub fn reload_handler(builder: ProxyBuilder, shared: SharedProxy) -> ChangeHandler {
    Arc::new(move |config: &ProxyConfig| {
        let router = builder.build(&config.gateway)?;
        let endpoints = router.endpoint_count();
        shared.store(Arc::new(router));
        // The new generation is subscribed already and picks this push up.
        builder.publish_services(&config.discovery);
        tracing::info!(gateway = %config.gateway.name, endpoints, "Proxy router swapped");
        Ok(())
    })
}
