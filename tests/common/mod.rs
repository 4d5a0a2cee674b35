//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use edge_gateway::config::{ConfigSource, ConfigWatcher, StaticSource};
use edge_gateway::discovery::{DiscoveryRegistry, StaticDiscovery};
use edge_gateway::middleware::MiddlewareRegistry;
use edge_gateway::proxy::{reload_handler, ProxyBuilder, SharedProxy};
use edge_gateway::HttpServer;

/// Mock upstream answering from a status script.
pub struct MockBackend {
    pub addr: SocketAddr,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Start a backend whose n-th response uses `statuses[n]`; the last status
/// repeats once the script runs out. The body names the backend address.
pub async fn start_backend(statuses: Vec<u16>) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let statuses = Arc::new(statuses);

    let counter = calls.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let counter = counter.clone();
            let statuses = statuses.clone();
            tokio::spawn(async move {
                // Read the request head; test requests carry no body.
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }

                let call = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses[call.min(statuses.len() - 1)];
                let body = addr.to_string();
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason(status),
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockBackend { addr, calls }
}

/// A gateway serving on an ephemeral port, configured from memory.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub source: Arc<StaticSource>,
    pub watcher: Arc<ConfigWatcher>,
    pub discovery: Arc<StaticDiscovery>,
    pub proxy: SharedProxy,
    shutdown: broadcast::Sender<()>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

pub async fn start_gateway(config: &str) -> TestGateway {
    let source = Arc::new(StaticSource::new(config));
    let watcher = Arc::new(ConfigWatcher::new(
        source.clone() as Arc<dyn ConfigSource>,
        Duration::from_secs(3600),
    ));
    let config = watcher.load().unwrap();

    let discovery = Arc::new(StaticDiscovery::new());
    let mut registry = DiscoveryRegistry::new();
    registry.register_default(discovery.clone());

    let builder = ProxyBuilder::new(MiddlewareRegistry::with_defaults(), registry)
        .with_configured_services(discovery.clone());
    builder.publish_services(&config.discovery);
    let proxy: SharedProxy = Arc::new(ArcSwap::from_pointee(builder.build(&config.gateway).unwrap()));
    watcher.watch(reload_handler(builder, proxy.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = broadcast::channel(1);
    let server = HttpServer::new(proxy.clone(), &config.listener);
    tokio::spawn(server.run(listener, rx));

    TestGateway {
        addr,
        source,
        watcher,
        discovery,
        proxy,
        shutdown,
    }
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
