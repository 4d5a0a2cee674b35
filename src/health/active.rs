//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe nodes whose backend enables health checks
//! - Update node health state with consecutive-result hysteresis
//!
//! Probes always target the generation current at tick time, so nodes that
//! left the directory are simply never probed again.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::{HealthCheckConfig, Protocol};
use crate::load_balancer::Node;
use crate::observability::metrics;
use crate::proxy::SharedProxy;
use crate::transport::client::{build_client, HttpClient};

pub struct HealthMonitor {
    proxy: SharedProxy,
    config: HealthCheckConfig,
    http_client: HttpClient,
    grpc_client: HttpClient,
}

impl HealthMonitor {
    pub fn new(proxy: SharedProxy, config: HealthCheckConfig) -> Self {
        Self {
            proxy,
            config,
            http_client: build_client(Protocol::Http),
            grpc_client: build_client(Protocol::Grpc),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every health-checked node of the current generation once.
    pub async fn check_all(&self) {
        let generation = self.proxy.load_full();
        let nodes: Vec<Arc<Node>> = generation
            .directories()
            .iter()
            .flat_map(|directory| directory.health_checked_nodes())
            .collect();

        join_all(nodes.iter().map(|node| self.check_node(node))).await;
    }

    async fn check_node(&self, node: &Node) {
        let healthy = self.probe(node).await;
        if healthy {
            node.mark_success(self.config.healthy_threshold as usize);
        } else {
            node.mark_failure(self.config.unhealthy_threshold as usize);
        }
        metrics::record_node_health(&node.address, node.is_healthy());
    }

    async fn probe(&self, node: &Node) -> bool {
        let uri = format!("http://{}{}", node.address, self.config.path);
        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "edge-gateway-health-check")
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(node = %node.address, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let client = match node.protocol {
            Protocol::Http => &self.http_client,
            Protocol::Grpc => &self.grpc_client,
        };
        let timeout = Duration::from_secs(self.config.timeout_secs);

        match time::timeout(timeout, client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(node = %node.address, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(node = %node.address, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(node = %node.address, "Health check failed: timeout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, EndpointConfig, GatewayConfig, Strategy};
    use crate::discovery::DiscoveryRegistry;
    use crate::middleware::MiddlewareRegistry;
    use crate::proxy::ProxyBuilder;
    use arc_swap::ArcSwap;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn health_backend(healthy: Arc<AtomicBool>) -> String {
        let app = axum::Router::new().route(
            "/health",
            get(move || {
                let healthy = healthy.clone();
                async move {
                    if healthy.load(Ordering::SeqCst) {
                        StatusCode::OK
                    } else {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        addr.to_string()
    }

    fn proxy_for(targets: &[(&str, bool)]) -> SharedProxy {
        let endpoint = EndpointConfig {
            path: "/*".into(),
            method: String::new(),
            protocol: Protocol::Http,
            timeout: Duration::from_secs(5),
            backends: targets
                .iter()
                .map(|(target, health_check)| BackendConfig {
                    target: target.to_string(),
                    weight: None,
                    health_check: *health_check,
                })
                .collect(),
            retry: None,
            middlewares: Vec::new(),
            load_balancer: Strategy::WeightedRoundRobin,
        };
        let gateway = GatewayConfig {
            endpoints: vec![endpoint],
            ..GatewayConfig::default()
        };
        let router = ProxyBuilder::new(MiddlewareRegistry::new(), DiscoveryRegistry::new())
            .build(&gateway)
            .unwrap();
        Arc::new(ArcSwap::from_pointee(router))
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            interval_secs: 1,
            timeout_secs: 1,
            path: "/health".into(),
            unhealthy_threshold: 2,
            healthy_threshold: 1,
        }
    }

    fn node(proxy: &SharedProxy, address: &str) -> Arc<Node> {
        proxy.load().directories()[0]
            .nodes()
            .iter()
            .find(|node| node.address == address)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_threshold_hysteresis() {
        let healthy = Arc::new(AtomicBool::new(false));
        let address = health_backend(healthy.clone()).await;
        let proxy = proxy_for(&[(&address, true)]);
        let monitor = HealthMonitor::new(proxy.clone(), config());

        monitor.check_all().await;
        assert!(node(&proxy, &address).is_healthy());
        monitor.check_all().await;
        assert!(!node(&proxy, &address).is_healthy());

        healthy.store(true, Ordering::SeqCst);
        monitor.check_all().await;
        assert!(node(&proxy, &address).is_healthy());
    }

    #[tokio::test]
    async fn test_only_opted_in_backends_are_probed() {
        let address = health_backend(Arc::new(AtomicBool::new(false))).await;
        let proxy = proxy_for(&[(&address, false)]);
        let monitor = HealthMonitor::new(proxy.clone(), config());

        monitor.check_all().await;
        monitor.check_all().await;
        assert!(node(&proxy, &address).is_healthy());
    }
}
