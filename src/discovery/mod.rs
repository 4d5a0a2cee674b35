//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Backend target "consul://orders"
//!     → target.rs (parse scheme, service, secure flag)
//!     → DiscoveryRegistry (scheme → provider)
//!     → hub.rs (one shared watch per (scheme, service), fanned out to
//!       every subscribed NodeDirectory)
//!     → provider stream of ServiceInstance lists
//! ```
//!
//! # Design Decisions
//! - Providers are injected per scheme into an explicit registry value
//! - A watch lives as long as at least one subscription handle does
//! - A new subscriber to a running watch is replayed the latest push

pub mod hub;
pub mod static_provider;
pub mod target;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use thiserror::Error;

pub use hub::{Subscription, WatchHub};
pub use static_provider::StaticDiscovery;
pub use target::Target;

/// Scheme that resolves to the registry's default provider.
pub const DEFAULT_SCHEME: &str = "discovery";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no discovery provider registered for scheme '{0}'")]
    UnknownScheme(String),

    #[error("invalid backend target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("watch for service '{service}' failed: {reason}")]
    Watch { service: String, reason: String },

    #[error("instance '{instance}' has invalid endpoint '{endpoint}': {reason}")]
    Translate {
        instance: String,
        endpoint: String,
        reason: String,
    },
}

/// One registered instance of a logical service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Endpoint URIs, e.g. `http://10.0.0.7:8000?isSecure=false`.
    pub endpoints: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, endpoints: Vec<String>) -> Self {
        Self {
            id: id.into(),
            endpoints,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Each item is the complete current instance list of the service.
pub type InstanceStream = BoxStream<'static, Result<Vec<ServiceInstance>, DiscoveryError>>;

/// A service registry integration.
pub trait DiscoveryProvider: Send + Sync {
    /// Start watching `service`.
    fn watch(&self, service: &str) -> Result<InstanceStream, DiscoveryError>;
}

/// Providers keyed by target URI scheme.
#[derive(Clone, Default)]
pub struct DiscoveryRegistry {
    providers: HashMap<String, Arc<dyn DiscoveryProvider>>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for `scheme://` targets.
    pub fn register(&mut self, scheme: impl Into<String>, provider: Arc<dyn DiscoveryProvider>) {
        self.providers.insert(scheme.into().to_ascii_lowercase(), provider);
    }

    /// Register `provider` as the target of `discovery://`.
    pub fn register_default(&mut self, provider: Arc<dyn DiscoveryProvider>) {
        self.register(DEFAULT_SCHEME, provider);
    }

    pub fn get(&self, scheme: &str) -> Result<Arc<dyn DiscoveryProvider>, DiscoveryError> {
        self.providers
            .get(&scheme.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| DiscoveryError::UnknownScheme(scheme.to_string()))
    }
}

impl std::fmt::Debug for DiscoveryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryRegistry")
            .field("schemes", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
