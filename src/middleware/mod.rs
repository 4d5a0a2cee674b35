//! Middleware composition.
//!
//! # Data Flow
//! ```text
//! [MiddlewareConfig] (gateway-wide first, then endpoint-scoped)
//!     → MiddlewareRegistry::create (name → factory → Middleware)
//!     → chain() folds them around the terminal transport
//!
//! Request:  first → second → ... → terminal
//! Response: terminal → ... → second → first
//! ```
//!
//! # Design Decisions
//! - The registry is a plain value built once at startup and shared
//! - Every middleware of a chain is created before any is applied, so an
//!   unknown name or bad options never yields a partial chain
//! - Middlewares talk to each other only through `RequestOptions`

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::MiddlewareConfig;
use crate::transport::Transport;

/// Wraps the next transport of the chain.
pub type Middleware = Arc<dyn Fn(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + Sync>;

/// Builds a middleware from its configured options.
pub type MiddlewareFactory = Arc<dyn Fn(&MiddlewareConfig) -> Result<Middleware, MiddlewareError> + Send + Sync>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MiddlewareError {
    #[error("unknown middleware '{0}'")]
    Unknown(String),

    #[error("invalid options for middleware '{name}': {reason}")]
    InvalidOptions { name: String, reason: String },
}

impl MiddlewareError {
    pub fn invalid(config: &MiddlewareConfig, reason: impl Into<String>) -> Self {
        MiddlewareError::InvalidOptions {
            name: config.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Factories keyed by middleware name.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    factories: HashMap<String, MiddlewareFactory>,
}

impl MiddlewareRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in middlewares.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        builtin::register_defaults(&mut registry);
        registry
    }

    /// Register `factory` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&MiddlewareConfig) -> Result<Middleware, MiddlewareError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, config: &MiddlewareConfig) -> Result<Middleware, MiddlewareError> {
        let factory = self
            .factories
            .get(&config.name)
            .ok_or_else(|| MiddlewareError::Unknown(config.name.clone()))?;
        factory(config)
    }

    /// Create every middleware in order; the first failure aborts.
    pub fn create_all<'a>(
        &self,
        configs: impl IntoIterator<Item = &'a MiddlewareConfig>,
    ) -> Result<Vec<Middleware>, MiddlewareError> {
        configs.into_iter().map(|config| self.create(config)).collect()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Wrap `terminal` so that `middlewares[0]` is outermost.
pub fn chain(middlewares: &[Middleware], terminal: Arc<dyn Transport>) -> Arc<dyn Transport> {
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, middleware| middleware(next))
}

/// Deserialize the options table of `config` into `T`.
pub fn parse_options<T: DeserializeOwned>(config: &MiddlewareConfig) -> Result<T, MiddlewareError> {
    toml::Value::Table(config.options.clone())
        .try_into()
        .map_err(|e: toml::de::Error| MiddlewareError::invalid(config, e.to_string()))
}
