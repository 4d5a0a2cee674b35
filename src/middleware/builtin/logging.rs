//! Access log line per request.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::config::MiddlewareConfig;
use crate::middleware::{Middleware, MiddlewareError};
use crate::transport::{ProxyRequest, ProxyResponse, RequestOptions, Transport, TransportError};

pub const NAME: &str = "logging";

pub fn factory(_config: &MiddlewareConfig) -> Result<Middleware, MiddlewareError> {
    Ok(Arc::new(|next: Arc<dyn Transport>| Arc::new(AccessLog { next }) as Arc<dyn Transport>))
}

struct AccessLog {
    next: Arc<dyn Transport>,
}

impl Transport for AccessLog {
    fn round_trip<'a>(
        &'a self,
        request: ProxyRequest,
        opts: &'a mut RequestOptions,
    ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = request.method().clone();
            let path = request.uri().path().to_string();

            let result = self.next.round_trip(request, opts).await;

            let latency_ms = start.elapsed().as_millis() as u64;
            let node = opts.current_node.as_ref().map(|node| node.address.as_str()).unwrap_or("-");
            match &result {
                Ok(response) => tracing::info!(
                    endpoint = %opts.endpoint,
                    method = %method,
                    path = %path,
                    status = response.status().as_u16(),
                    latency_ms,
                    attempts = opts.attempt,
                    node,
                    "Request completed"
                ),
                Err(e) => tracing::warn!(
                    endpoint = %opts.endpoint,
                    method = %method,
                    path = %path,
                    error = %e,
                    latency_ms,
                    attempts = opts.attempt,
                    node,
                    "Request failed"
                ),
            }
            result
        })
    }
}
