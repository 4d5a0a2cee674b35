//! Restricts node selection to nodes carrying the given labels.
//!
//! The filter is written into the request options, so it also applies to
//! every retry attempt made further down the chain.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Deserialize;

use crate::config::MiddlewareConfig;
use crate::load_balancer::filters;
use crate::middleware::{parse_options, Middleware, MiddlewareError};
use crate::transport::{ProxyRequest, ProxyResponse, RequestOptions, Transport, TransportError};

pub const NAME: &str = "node_selector";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Options {
    labels: HashMap<String, String>,
}

pub fn factory(config: &MiddlewareConfig) -> Result<Middleware, MiddlewareError> {
    let options: Options = parse_options(config)?;
    if options.labels.is_empty() {
        return Err(MiddlewareError::invalid(config, "labels must not be empty"));
    }

    let labels = options.labels;
    Ok(Arc::new(move |next: Arc<dyn Transport>| {
        Arc::new(NodeSelector {
            labels: labels.clone(),
            next,
        }) as Arc<dyn Transport>
    }))
}

struct NodeSelector {
    labels: HashMap<String, String>,
    next: Arc<dyn Transport>,
}

impl Transport for NodeSelector {
    fn round_trip<'a>(
        &'a self,
        request: ProxyRequest,
        opts: &'a mut RequestOptions,
    ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
        opts.filters.push(filters::require_labels(self.labels.clone()));
        self.next.round_trip(request, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, EndpointConfig, Protocol, Strategy};
    use crate::discovery::{DiscoveryProvider, DiscoveryRegistry, ServiceInstance, StaticDiscovery, WatchHub};
    use crate::load_balancer::NodeDirectory;
    use crate::transport::testing::get;
    use std::time::Duration;

    struct Selecting(Arc<NodeDirectory>);

    impl Transport for Selecting {
        fn round_trip<'a>(
            &'a self,
            _request: ProxyRequest,
            opts: &'a mut RequestOptions,
        ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
            Box::pin(async move {
                self.0.select_for(opts)?;
                Ok(crate::transport::testing::status_response(200))
            })
        }
    }

    #[tokio::test]
    async fn test_labels_restrict_selection() {
        let provider = Arc::new(StaticDiscovery::new());
        provider.push(
            "orders",
            vec![
                ServiceInstance::new("a", vec!["http://10.0.0.1:80".into()]).with_metadata("zone", "east"),
                ServiceInstance::new("b", vec!["http://10.0.0.2:80".into()]).with_metadata("zone", "west"),
            ],
        );
        let mut registry = DiscoveryRegistry::new();
        registry.register_default(provider.clone() as Arc<dyn DiscoveryProvider>);

        let endpoint = EndpointConfig {
            path: "/orders".into(),
            method: String::new(),
            protocol: Protocol::Http,
            timeout: Duration::from_secs(5),
            backends: vec![BackendConfig {
                target: "discovery://orders".into(),
                weight: None,
                health_check: false,
            }],
            retry: None,
            middlewares: Vec::new(),
            load_balancer: Strategy::WeightedRoundRobin,
        };
        let directory = NodeDirectory::new("/orders", Protocol::Http, Strategy::WeightedRoundRobin);
        directory.apply(&endpoint, &registry, &WatchHub::new()).unwrap();
        for _ in 0..100 {
            if directory.nodes().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let config: MiddlewareConfig = toml::from_str(
            r#"
            name = "node_selector"
            options = { labels = { zone = "west" } }
            "#,
        )
        .unwrap();
        let transport = factory(&config).unwrap()(Arc::new(Selecting(directory)));

        for _ in 0..4 {
            let mut opts = RequestOptions::new("/orders", Duration::from_secs(1));
            transport.round_trip(get("/orders"), &mut opts).await.unwrap();
            assert_eq!(opts.used_nodes, ["10.0.0.2:80"]);
        }
    }

    #[test]
    fn test_requires_labels() {
        assert!(factory(&MiddlewareConfig::new(NAME)).is_err());
    }
}
