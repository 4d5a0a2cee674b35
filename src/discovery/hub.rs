//! Shared discovery watches with reference-counted fan-out.
//!
//! # Responsibilities
//! - Start at most one provider watch per (scheme, service)
//! - Deliver every push to all current subscribers
//! - Stop the watch when its last subscription is dropped
//!
//! # Design Decisions
//! - Subscribe/unsubscribe take the write lock, delivery the read lock
//! - Callbacks run after the map lock is released, so a slow subscriber
//!   never blocks registration or another watch
//! - Each watch serializes its pushes and replays behind its own `latest`
//!   lock; a replay can never land after a newer push
//! - Callbacks must not subscribe to the watch that invokes them
//! - The watch task holds only a weak reference to the hub

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::discovery::{DiscoveryError, DiscoveryProvider, InstanceStream, ServiceInstance};

/// Receives the complete instance list on every push.
pub type InstanceCallback = Arc<dyn Fn(&[ServiceInstance]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatchKey {
    scheme: String,
    service: String,
}

struct WatchEntry {
    subscribers: HashMap<u64, InstanceCallback>,
    /// Last push; held while a push or replay is being delivered.
    latest: Arc<Mutex<Option<Arc<Vec<ServiceInstance>>>>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct HubInner {
    watches: RwLock<HashMap<WatchKey, WatchEntry>>,
    next_id: AtomicU64,
}

/// Registry of live discovery watches.
#[derive(Clone, Default)]
pub struct WatchHub {
    inner: Arc<HubInner>,
}

impl WatchHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `callback` to `scheme://service`, starting the watch on
    /// `provider` if nobody watches it yet. A running watch replays its
    /// latest push to the new subscriber.
    pub fn subscribe(
        &self,
        scheme: &str,
        service: &str,
        provider: &dyn DiscoveryProvider,
        callback: InstanceCallback,
    ) -> Result<Subscription, DiscoveryError> {
        let key = WatchKey {
            scheme: scheme.to_string(),
            service: service.to_string(),
        };
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let replay = {
            let mut watches = self.inner.watches.write();
            match watches.get_mut(&key) {
                Some(entry) => {
                    entry.subscribers.insert(id, callback.clone());
                    Some(entry.latest.clone())
                }
                None => {
                    let stream = provider.watch(service)?;
                    let task = tokio::spawn(run_watch(Arc::downgrade(&self.inner), key.clone(), stream));
                    watches.insert(
                        key.clone(),
                        WatchEntry {
                            subscribers: HashMap::from([(id, callback.clone())]),
                            latest: Arc::new(Mutex::new(None)),
                            task,
                        },
                    );
                    tracing::info!(scheme = %key.scheme, service = %key.service, "Discovery watch started");
                    None
                }
            }
        };

        if let Some(latest) = replay {
            let latest = latest.lock();
            if let Some(instances) = latest.as_ref() {
                callback(instances);
            }
        }

        Ok(Subscription {
            hub: Arc::downgrade(&self.inner),
            key,
            id,
        })
    }

    /// Number of live provider watches.
    pub fn watch_count(&self) -> usize {
        self.inner.watches.read().len()
    }

    /// Number of subscribers sharing the watch on `scheme://service`.
    pub fn subscriber_count(&self, scheme: &str, service: &str) -> usize {
        let key = WatchKey {
            scheme: scheme.to_string(),
            service: service.to_string(),
        };
        self.inner
            .watches
            .read()
            .get(&key)
            .map_or(0, |entry| entry.subscribers.len())
    }
}

impl std::fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHub")
            .field("watches", &self.watch_count())
            .finish()
    }
}

impl HubInner {
    fn deliver(&self, key: &WatchKey, instances: Vec<ServiceInstance>) {
        let instances = Arc::new(instances);
        let Some(latest) = self.watches.read().get(key).map(|entry| entry.latest.clone()) else {
            return;
        };

        let mut latest = latest.lock();
        *latest = Some(instances.clone());
        // Collected under the delivery lock: a subscriber missing from this
        // list replays the value just stored.
        let callbacks: Vec<InstanceCallback> = match self.watches.read().get(key) {
            Some(entry) => entry.subscribers.values().cloned().collect(),
            None => return,
        };

        tracing::debug!(
            service = %key.service,
            instances = instances.len(),
            subscribers = callbacks.len(),
            "Delivering discovery push"
        );
        for callback in callbacks {
            callback(&instances);
        }
        drop(latest);
    }

    fn unsubscribe(&self, key: &WatchKey, id: u64) {
        let mut watches = self.watches.write();
        let Some(entry) = watches.get_mut(key) else {
            return;
        };
        entry.subscribers.remove(&id);
        if entry.subscribers.is_empty() {
            if let Some(entry) = watches.remove(key) {
                entry.task.abort();
                tracing::info!(scheme = %key.scheme, service = %key.service, "Discovery watch stopped");
            }
        }
    }
}

async fn run_watch(hub: Weak<HubInner>, key: WatchKey, mut stream: InstanceStream) {
    while let Some(item) = stream.next().await {
        let Some(inner) = hub.upgrade() else {
            return;
        };
        match item {
            Ok(instances) => inner.deliver(&key, instances),
            Err(e) => tracing::warn!(
                service = %key.service,
                error = %e,
                "Discovery watch error, keeping current nodes"
            ),
        }
    }
    tracing::debug!(service = %key.service, "Discovery stream ended");
}

/// Handle for one subscriber; dropping it unsubscribes.
pub struct Subscription {
    hub: Weak<HubInner>,
    key: WatchKey,
    id: u64,
}

impl Subscription {
    /// Unsubscribe explicitly.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            inner.unsubscribe(&self.key, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("scheme", &self.key.scheme)
            .field("service", &self.key.service)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<usize>>>;

    fn recorder() -> (Seen, InstanceCallback) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: InstanceCallback = Arc::new(move |instances: &[ServiceInstance]| {
            sink.lock().push(instances.len());
        });
        (seen, callback)
    }

    fn instances(n: usize) -> Vec<ServiceInstance> {
        (0..n)
            .map(|i| ServiceInstance::new(format!("i{i}"), vec![format!("http://10.0.0.{i}:80")]))
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_shared_watch_fans_out() {
        let provider = StaticDiscovery::new();
        let hub = WatchHub::new();
        let (seen_a, cb_a) = recorder();
        let (seen_b, cb_b) = recorder();

        let _sub_a = hub.subscribe("discovery", "orders", &provider, cb_a).unwrap();
        let _sub_b = hub.subscribe("discovery", "orders", &provider, cb_b).unwrap();
        assert_eq!(provider.watch_calls(), 1);
        assert_eq!(hub.watch_count(), 1);
        assert_eq!(hub.subscriber_count("discovery", "orders"), 2);

        provider.push("orders", instances(2));
        settle().await;

        assert_eq!(*seen_a.lock(), vec![2]);
        assert_eq!(*seen_b.lock(), vec![2]);
    }

    #[tokio::test]
    async fn test_unsubscribe_keeps_other_subscribers() {
        let provider = StaticDiscovery::new();
        let hub = WatchHub::new();
        let (seen_a, cb_a) = recorder();
        let (seen_b, cb_b) = recorder();

        let sub_a = hub.subscribe("discovery", "orders", &provider, cb_a).unwrap();
        let sub_b = hub.subscribe("discovery", "orders", &provider, cb_b).unwrap();

        sub_a.cancel();
        assert_eq!(hub.watch_count(), 1);

        provider.push("orders", instances(3));
        settle().await;
        assert!(seen_a.lock().is_empty());
        assert_eq!(*seen_b.lock(), vec![3]);

        drop(sub_b);
        assert_eq!(hub.watch_count(), 0);
        assert_eq!(hub.subscriber_count("discovery", "orders"), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_latest_push() {
        let provider = StaticDiscovery::new();
        let hub = WatchHub::new();
        let (_, cb_a) = recorder();
        let _sub_a = hub.subscribe("discovery", "orders", &provider, cb_a).unwrap();

        provider.push("orders", instances(4));
        settle().await;

        let (seen_late, cb_late) = recorder();
        let _sub_late = hub.subscribe("discovery", "orders", &provider, cb_late).unwrap();
        assert_eq!(*seen_late.lock(), vec![4]);
        assert_eq!(provider.watch_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_push_during_slow_replay_is_not_overwritten() {
        let provider = Arc::new(StaticDiscovery::new());
        let hub = WatchHub::new();
        let (_, cb_a) = recorder();
        let _sub_a = hub.subscribe("discovery", "orders", provider.as_ref(), cb_a).unwrap();

        provider.push("orders", instances(1));
        settle().await;

        // The late subscriber stalls while applying its replay.
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let slow: InstanceCallback = Arc::new(move |instances: &[ServiceInstance]| {
            if sink.lock().is_empty() {
                std::thread::sleep(Duration::from_millis(200));
            }
            sink.lock().push(instances.len());
        });
        let late = {
            let (hub, provider) = (hub.clone(), provider.clone());
            tokio::task::spawn_blocking(move || hub.subscribe("discovery", "orders", provider.as_ref(), slow).unwrap())
        };

        settle().await;
        provider.push("orders", instances(2));
        let _sub_late = late.await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(seen.lock().last(), Some(&2));
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_resubscribe_after_teardown_starts_new_watch() {
        let provider = StaticDiscovery::new();
        let hub = WatchHub::new();

        let (_, cb) = recorder();
        drop(hub.subscribe("discovery", "orders", &provider, cb).unwrap());
        assert_eq!(hub.watch_count(), 0);

        let (_, cb) = recorder();
        let _sub = hub.subscribe("discovery", "orders", &provider, cb).unwrap();
        assert_eq!(provider.watch_calls(), 2);
        assert_eq!(hub.watch_count(), 1);
    }
}
