//! Per-endpoint pipeline assembly.
//!
//! An endpoint's transport is built inside out:
//! node transport, then the retry coordinator, then the middleware chain
//! (gateway-wide middlewares outside the endpoint's own).

use std::sync::Arc;
use std::time::Duration;

use crate::config::{EndpointConfig, MiddlewareConfig, Protocol};
use crate::load_balancer::NodeDirectory;
use crate::middleware;
use crate::proxy::{BuildError, ProxyBuilder};
use crate::resilience::{RetryCoordinator, RetryPolicy};
use crate::transport::{NodeTransport, Transport};

/// Routable endpoint of one proxy generation.
pub struct EndpointHandle {
    pub path: String,
    pub method: String,
    pub protocol: Protocol,
    pub timeout: Duration,
    pub transport: Arc<dyn Transport>,
    pub directory: Arc<NodeDirectory>,
}

impl std::fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("protocol", &self.protocol)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub(crate) fn build_endpoint(
    builder: &ProxyBuilder,
    shared: &[MiddlewareConfig],
    endpoint: &EndpointConfig,
) -> Result<EndpointHandle, BuildError> {
    let path = endpoint.path.clone();

    let policy = RetryPolicy::from_config(endpoint.retry.as_ref()).map_err(|source| BuildError::Condition {
        path: path.clone(),
        source,
    })?;

    // Create every middleware before touching discovery so a bad name
    // leaves no watch behind.
    let middlewares = builder
        .middlewares
        .create_all(shared.iter().chain(&endpoint.middlewares))
        .map_err(|source| BuildError::Middleware {
            path: path.clone(),
            source,
        })?;

    let directory = NodeDirectory::new(&path, endpoint.protocol, endpoint.load_balancer);
    directory
        .apply(endpoint, &builder.discovery, &builder.hub)
        .map_err(|source| BuildError::Discovery {
            path: path.clone(),
            source,
        })?;

    let client = match endpoint.protocol {
        Protocol::Http => builder.http_client.clone(),
        Protocol::Grpc => builder.grpc_client.clone(),
    };
    let terminal: Arc<dyn Transport> = Arc::new(NodeTransport::new(directory.clone(), client, endpoint.protocol));
    let retrying: Arc<dyn Transport> = Arc::new(RetryCoordinator::new(terminal, policy));
    let transport = middleware::chain(&middlewares, retrying);

    tracing::debug!(
        endpoint = %path,
        protocol = %endpoint.protocol,
        backends = endpoint.backends.len(),
        middlewares = middlewares.len(),
        "Endpoint built"
    );

    Ok(EndpointHandle {
        path,
        method: endpoint.method.clone(),
        protocol: endpoint.protocol,
        timeout: endpoint.timeout,
        transport,
        directory,
    })
}
