//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config source (file / in-memory)
//!     → source.rs (raw bytes + change hint)
//!     → loader.rs (parse TOML & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! On change:
//!     watcher.rs detects a new content hash
//!     → loader.rs parses, validation.rs validates
//!     → change handlers rebuild the proxy router
//!     → hash committed only if every handler succeeded
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod duration_format;
pub mod loader;
pub mod schema;
pub mod source;
pub mod validation;
pub mod watcher;

pub use loader::ConfigError;
pub use schema::{
    BackendConfig, ConditionConfig, DiscoveryConfig, EndpointConfig, GatewayConfig,
    HeaderCondition, HealthCheckConfig, InstanceConfig, ListenerConfig, MiddlewareConfig,
    ObservabilityConfig, Protocol, ProxyConfig, RetryConfig, Strategy, WatcherConfig,
};
pub use source::{ConfigSource, FileSource, StaticSource};
pub use watcher::{ChangeHandler, ConfigWatcher, HandlerError, PollOutcome};
