//! Per-endpoint node directory.
//!
//! # Responsibilities
//! - Resolve an endpoint's backend targets into selectable nodes
//! - Keep one node slot per backend, refreshed by discovery pushes
//! - Publish the combined set as one immutable snapshot
//! - Pick a node for a request through filters and the balancer
//!
//! # Design Decisions
//! - Each push replaces its backend's slot wholesale, never merges
//! - A push that yields no nodes keeps the previous slot
//! - A push with an untranslatable endpoint is dropped entirely

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use url::Url;

use crate::config::{BackendConfig, EndpointConfig, Protocol, Strategy};
use crate::discovery::hub::InstanceCallback;
use crate::discovery::target::secure_flag;
use crate::discovery::{
    DiscoveryError, DiscoveryRegistry, ServiceInstance, Subscription, Target, WatchHub,
};
use crate::load_balancer::node::{Node, DEFAULT_WEIGHT};
use crate::load_balancer::{balancer_for, LoadBalancer, NodeFilter, SelectError};
use crate::observability::metrics;
use crate::transport::RequestOptions;

/// Live node set of one endpoint.
pub struct NodeDirectory {
    endpoint: String,
    protocol: Protocol,
    balancer: Box<dyn LoadBalancer>,
    /// Combined, deduplicated snapshot read by every selection.
    nodes: ArcSwap<Vec<Arc<Node>>>,
    /// Per-backend node lists; only touched by writers.
    slots: Mutex<Vec<Vec<Arc<Node>>>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl NodeDirectory {
    pub fn new(endpoint: impl Into<String>, protocol: Protocol, strategy: Strategy) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            protocol,
            balancer: balancer_for(strategy),
            nodes: ArcSwap::from_pointee(Vec::new()),
            slots: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Resolve every backend of `endpoint`.
    ///
    /// Direct targets are installed immediately. Discovery targets subscribe
    /// to the shared watch of their service; their nodes appear on the
    /// first push. Any previous subscriptions of this directory are released.
    pub fn apply(
        self: &Arc<Self>,
        endpoint: &EndpointConfig,
        registry: &DiscoveryRegistry,
        hub: &WatchHub,
    ) -> Result<(), DiscoveryError> {
        let targets = endpoint
            .backends
            .iter()
            .map(|backend| Target::parse(&backend.target))
            .collect::<Result<Vec<_>, _>>()?;

        *self.slots.lock() = vec![Vec::new(); targets.len()];
        let mut subscriptions = Vec::new();

        for (slot, (backend, target)) in endpoint.backends.iter().zip(targets).enumerate() {
            match target {
                Target::Direct { address } => {
                    let weight = backend.weight.unwrap_or(DEFAULT_WEIGHT);
                    let node = Node::new(address, self.protocol, weight)
                        .with_health_check(backend.health_check);
                    self.replace_slot(slot, vec![Arc::new(node)]);
                }
                Target::Discovery {
                    scheme,
                    service,
                    secure,
                } => {
                    let provider = registry.get(&scheme)?;
                    let callback = self.discovery_callback(slot, backend.clone(), secure);
                    subscriptions.push(hub.subscribe(&scheme, &service, provider.as_ref(), callback)?);
                }
            }
        }

        *self.subscriptions.lock() = subscriptions;
        self.publish();
        Ok(())
    }

    fn discovery_callback(self: &Arc<Self>, slot: usize, backend: BackendConfig, secure: bool) -> InstanceCallback {
        let directory: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |instances: &[ServiceInstance]| {
            if let Some(directory) = directory.upgrade() {
                directory.on_instances(slot, &backend, secure, instances);
            }
        })
    }

    fn on_instances(&self, slot: usize, backend: &BackendConfig, secure: bool, instances: &[ServiceInstance]) {
        if instances.is_empty() {
            tracing::warn!(
                endpoint = %self.endpoint,
                target = %backend.target,
                "Discovery push has no instances, keeping previous nodes"
            );
            return;
        }

        let nodes = match translate(instances, backend, self.protocol, secure) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Dropping discovery push");
                return;
            }
        };

        if nodes.is_empty() {
            tracing::warn!(
                endpoint = %self.endpoint,
                target = %backend.target,
                scheme = self.protocol.scheme(),
                "No instance endpoint matches, keeping previous nodes"
            );
            return;
        }

        self.replace_slot(slot, nodes);
    }

    fn replace_slot(&self, slot: usize, nodes: Vec<Arc<Node>>) {
        let mut slots = self.slots.lock();
        if let Some(entry) = slots.get_mut(slot) {
            *entry = nodes;
        }
        self.store(&slots);
    }

    fn publish(&self) {
        let slots = self.slots.lock();
        self.store(&slots);
    }

    /// Combine the slots into a new snapshot. Caller holds the slot lock.
    fn store(&self, slots: &[Vec<Arc<Node>>]) {
        let mut seen = HashSet::new();
        let combined: Vec<Arc<Node>> = slots
            .iter()
            .flatten()
            .filter(|node| seen.insert(node.address.clone()))
            .cloned()
            .collect();

        tracing::info!(endpoint = %self.endpoint, nodes = combined.len(), "Node set updated");
        metrics::record_node_count(&self.endpoint, combined.len());
        self.nodes.store(Arc::new(combined));
    }

    /// Current snapshot.
    pub fn nodes(&self) -> Arc<Vec<Arc<Node>>> {
        self.nodes.load_full()
    }

    /// Nodes probed by active health checks.
    pub fn health_checked_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes
            .load()
            .iter()
            .filter(|node| node.health_checked)
            .cloned()
            .collect()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Pick one node after applying `filters` in order.
    ///
    /// Unhealthy nodes are skipped unless every node is unhealthy.
    pub fn select(&self, filters: &[NodeFilter]) -> Result<Arc<Node>, SelectError> {
        let snapshot = self.nodes.load_full();
        let mut candidates: Vec<Arc<Node>> = snapshot.iter().filter(|node| node.is_healthy()).cloned().collect();
        if candidates.is_empty() {
            candidates = snapshot.as_ref().clone();
        }

        for filter in filters {
            candidates = filter(candidates);
        }

        self.balancer
            .next_node(&candidates)
            .ok_or(SelectError::NoAvailableNode)
    }

    /// Select with the request's filters and record the pick in `opts`.
    pub fn select_for(&self, opts: &mut RequestOptions) -> Result<Arc<Node>, SelectError> {
        let filters: Vec<NodeFilter> = opts
            .filters
            .iter()
            .chain(opts.attempt_filters.iter())
            .cloned()
            .collect();

        let node = self.select(&filters)?;
        opts.used_nodes.push(node.address.clone());
        opts.current_node = Some(node.clone());
        Ok(node)
    }
}

impl std::fmt::Debug for NodeDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDirectory")
            .field("endpoint", &self.endpoint)
            .field("protocol", &self.protocol)
            .field("balancer", &self.balancer)
            .field("nodes", &self.nodes.load().len())
            .finish()
    }
}

/// Translate instances into nodes for `protocol`.
///
/// Only endpoint URIs whose scheme matches the protocol and whose
/// `isSecure` flag matches `secure` are used.
fn translate(
    instances: &[ServiceInstance],
    backend: &BackendConfig,
    protocol: Protocol,
    secure: bool,
) -> Result<Vec<Arc<Node>>, DiscoveryError> {
    let mut nodes = Vec::new();
    for instance in instances {
        for raw in &instance.endpoints {
            let translate_error = |reason: &str| DiscoveryError::Translate {
                instance: instance.id.clone(),
                endpoint: raw.clone(),
                reason: reason.to_string(),
            };

            let url = Url::parse(raw).map_err(|e| translate_error(&e.to_string()))?;
            if !url.scheme().eq_ignore_ascii_case(protocol.scheme()) || secure_flag(&url) != secure {
                continue;
            }

            let host = url.host_str().ok_or_else(|| translate_error("missing host"))?;
            let port = url
                .port_or_known_default()
                .ok_or_else(|| translate_error("missing port"))?;

            let weight = backend
                .weight
                .or_else(|| instance.metadata.get("weight").and_then(|w| w.parse().ok()))
                .unwrap_or(DEFAULT_WEIGHT);

            let node = Node::new(format!("{host}:{port}"), protocol, weight)
                .with_version(instance.version.clone())
                .with_metadata(instance.metadata.clone())
                .with_health_check(backend.health_check);
            nodes.push(Arc::new(node));
        }
    }
    Ok(nodes)
}
