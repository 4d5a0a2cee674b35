//! Edge gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ proxy::ProxyRouter (current generation)
//!                                   │
//!                                   ├─ routing (host, path, method, protocol)
//!                                   └─ endpoint pipeline
//!                                        middleware chain
//!                                        → resilience::RetryCoordinator
//!                                        → transport::NodeTransport
//!                                        → load_balancer::NodeDirectory ◀── discovery
//!
//!     config::ConfigWatcher ──(hash changed)──▶ ProxyBuilder::build ──▶ swap
//!     health::HealthMonitor ──▶ node health
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Parser;
use tokio::net::TcpListener;

use edge_gateway::config::loader::load_config;
use edge_gateway::config::{ConfigWatcher, FileSource};
use edge_gateway::discovery::{DiscoveryRegistry, StaticDiscovery};
use edge_gateway::health::HealthMonitor;
use edge_gateway::lifecycle::signals;
use edge_gateway::middleware::MiddlewareRegistry;
use edge_gateway::observability::{logging, metrics};
use edge_gateway::proxy::{reload_handler, ProxyBuilder, SharedProxy};
use edge_gateway::{HttpServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "edge-gateway", version, about = "Hot-reloadable reverse-proxy gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let interval = load_config(&args.config)?.watcher.poll_interval;
    let watcher = Arc::new(ConfigWatcher::new(Arc::new(FileSource::new(&args.config)), interval));
    let config = watcher.load()?;

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "edge-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let configured = Arc::new(StaticDiscovery::new());
    let mut discovery = DiscoveryRegistry::new();
    discovery.register_default(configured.clone());
    let builder = ProxyBuilder::new(MiddlewareRegistry::with_defaults(), discovery)
        .with_configured_services(configured)
        .with_max_body_bytes(config.listener.max_body_bytes);
    builder.publish_services(&config.discovery);

    let router = builder.build(&config.gateway)?;
    let proxy: SharedProxy = Arc::new(ArcSwap::from_pointee(router));
    watcher.watch(reload_handler(builder, proxy.clone()));

    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_shutdown_listener(shutdown.clone());
    signals::spawn_reload_listener(watcher.clone(), shutdown.subscribe());

    let watcher_task = watcher.clone().spawn(shutdown.subscribe());
    let monitor = HealthMonitor::new(proxy.clone(), config.health_check.clone());
    let monitor_task = tokio::spawn(monitor.run(shutdown.subscribe()));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(proxy, &config.listener)
        .run(listener, shutdown.subscribe())
        .await?;

    watcher.close();
    let _ = tokio::join!(watcher_task, monitor_task);

    tracing::info!("Shutdown complete");
    Ok(())
}
