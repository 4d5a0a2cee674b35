//! Configuration watcher for hot reload.
//!
//! The watcher re-reads its source on a fixed interval (or earlier, when the
//! source signals a change), hashes the raw bytes and hands every new
//! version to the registered change handlers. The content hash is committed
//! only after a parse and a fully successful handler pass, so a rejected
//! version is retried on the next tick. Handlers must be idempotent.
//!
//! Polls are serialized: a poll triggered by a signal waits for a running
//! tick, then re-reads the source, so the newest version always wins.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::ProxyConfig;
use crate::config::source::ConfigSource;
use crate::observability::metrics;

pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Invoked with every new configuration version.
pub type ChangeHandler = Arc<dyn Fn(&ProxyConfig) -> Result<(), HandlerError> + Send + Sync>;

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Applied,
    /// Loading, parsing or a handler failed; the hash was not committed.
    Rejected,
}

pub struct ConfigWatcher {
    source: Arc<dyn ConfigSource>,
    interval: Duration,
    handlers: RwLock<Vec<ChangeHandler>>,
    committed_hash: Mutex<Option<String>>,
    /// Held for a whole load or poll.
    reload: Mutex<()>,
    closed: CancellationToken,
}

impl ConfigWatcher {
    pub fn new(source: Arc<dyn ConfigSource>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            handlers: RwLock::new(Vec::new()),
            committed_hash: Mutex::new(None),
            reload: Mutex::new(()),
            closed: CancellationToken::new(),
        }
    }

    /// Load the current configuration and commit its hash as the baseline.
    pub fn load(&self) -> Result<ProxyConfig, ConfigError> {
        let _reload = self.reload.lock();
        let bytes = self.source.load()?;
        let config = parse_config(&bytes)?;
        *self.committed_hash.lock() = Some(content_hash(&bytes));
        Ok(config)
    }

    /// Register a change handler.
    pub fn watch(&self, handler: ChangeHandler) {
        self.handlers.write().push(handler);
    }

    /// Hash of the last fully applied configuration.
    pub fn committed_hash(&self) -> Option<String> {
        self.committed_hash.lock().clone()
    }

    /// Check the source once and apply a changed configuration.
    ///
    /// Handlers must not poll the same watcher.
    pub fn poll_once(&self) -> PollOutcome {
        let _reload = self.reload.lock();
        let bytes = match self.source.load() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read config source");
                return PollOutcome::Rejected;
            }
        };

        let hash = content_hash(&bytes);
        if self.committed_hash.lock().as_deref() == Some(hash.as_str()) {
            return PollOutcome::Unchanged;
        }

        tracing::info!(hash = %hash, "Config change detected, reloading...");

        let config = match parse_config(&bytes) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to reload config: {}. Keeping current configuration.", e);
                metrics::record_reload(false);
                return PollOutcome::Rejected;
            }
        };

        // Handlers run outside the handler lock so one may register another.
        let handlers = self.handlers.read().clone();
        let mut failed = false;
        for handler in &handlers {
            if let Err(e) = handler(&config) {
                tracing::error!("Config handler failed: {}. Keeping current configuration.", e);
                failed = true;
            }
        }

        metrics::record_reload(!failed);
        if failed {
            return PollOutcome::Rejected;
        }

        *self.committed_hash.lock() = Some(hash);
        tracing::info!(gateway = %config.gateway.name, "Configuration reloaded");
        PollOutcome::Applied
    }

    /// Start the polling loop on a dedicated task.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let hint = self.source.change_hint();
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // The first tick completes immediately; `load` already covered it.
            ticker.tick().await;

            tracing::info!(interval = ?self.interval, "Config watcher started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = wait_hint(hint.as_deref()) => {}
                    _ = self.closed.cancelled() => break,
                    _ = shutdown.recv() => break,
                }
                self.poll_once();
            }

            tracing::info!("Config watcher stopped");
        })
    }

    /// Stop the polling loop.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

async fn wait_hint(hint: Option<&tokio::sync::Notify>) {
    match hint {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
