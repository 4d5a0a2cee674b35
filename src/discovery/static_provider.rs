//! In-process discovery provider.
//!
//! Instance lists are pushed programmatically or taken from the
//! `[discovery.services]` config section; every watcher of a service
//! observes the latest list.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::config::{DiscoveryConfig, InstanceConfig};
use crate::discovery::{DiscoveryError, DiscoveryProvider, InstanceStream, ServiceInstance};

type Slot = watch::Sender<Option<Vec<ServiceInstance>>>;

#[derive(Default)]
pub struct StaticDiscovery {
    services: RwLock<HashMap<String, Slot>>,
    /// Services owned by the config file, as last applied.
    configured: Mutex<BTreeMap<String, Vec<InstanceConfig>>>,
    watch_calls: AtomicUsize,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the instance list of `service`.
    pub fn push(&self, service: &str, instances: Vec<ServiceInstance>) {
        let mut services = self.services.write();
        let slot = services
            .entry(service.to_string())
            .or_insert_with(|| watch::channel(None).0);
        slot.send_replace(Some(instances));
    }

    /// Publish the services of `config`. Unchanged services are not
    /// re-pushed; services dropped from the file are emptied. Lists pushed
    /// for other services are left alone.
    pub fn apply_config(&self, config: &DiscoveryConfig) {
        let mut configured = self.configured.lock();

        for service in configured.keys() {
            if !config.services.contains_key(service) {
                tracing::info!(service = %service, "Configured discovery service removed");
                self.push(service, Vec::new());
            }
        }
        for (service, instances) in &config.services {
            if configured.get(service) == Some(instances) {
                continue;
            }
            let list: Vec<ServiceInstance> = instances
                .iter()
                .enumerate()
                .map(|(index, instance)| from_config(service, index, instance))
                .collect();
            tracing::info!(service = %service, instances = list.len(), "Configured discovery service published");
            self.push(service, list);
        }

        *configured = config.services.clone();
    }

    /// How many watches have been opened, across all services.
    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::Relaxed)
    }
}

fn from_config(service: &str, index: usize, config: &InstanceConfig) -> ServiceInstance {
    let id = if config.id.is_empty() {
        format!("{service}-{index}")
    } else {
        config.id.clone()
    };
    ServiceInstance {
        id,
        name: service.to_string(),
        version: config.version.clone(),
        endpoints: config.endpoints.clone(),
        metadata: config.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    }
}

impl DiscoveryProvider for StaticDiscovery {
    fn watch(&self, service: &str) -> Result<InstanceStream, DiscoveryError> {
        self.watch_calls.fetch_add(1, Ordering::Relaxed);
        let rx = self
            .services
            .write()
            .entry(service.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();

        // Yield the current list (if any), then one item per change.
        let stream = futures_util::stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            loop {
                let current = rx.borrow_and_update().clone();
                match current {
                    Some(instances) => return Some((Ok(instances), (rx, false))),
                    None => {
                        if rx.changed().await.is_err() {
                            return None;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
