//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all proxy handler
//! - Wire up tower layers (tracing, request ID, body limit)
//! - Bind the server to a listener and drain on shutdown
//! - Dispatch every request to the current proxy generation

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ListenerConfig;
use crate::proxy::SharedProxy;

/// HTTP front door of the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(proxy: SharedProxy, config: &ListenerConfig) -> Self {
        Self {
            router: Self::build_router(proxy, config),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(proxy: SharedProxy, config: &ListenerConfig) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(proxy)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.max_body_bytes)),
            )
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Forward the request through the proxy generation current at arrival.
async fn proxy_handler(State(proxy): State<SharedProxy>, request: Request<Body>) -> Response<Body> {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let generation = proxy.load_full();
    generation.dispatch(request, client).await
}
