//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.
//! Durations are humantime strings (`"500ms"`, `"3s"`).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::duration_format;

/// Root configuration file.
///
/// Process-level settings sit beside the routable [`GatewayConfig`]. Only
/// the `gateway` and `discovery` sections are re-applied on hot reload.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Config file polling settings.
    pub watcher: WatcherConfig,

    /// Active health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Routing state: endpoints, backends and middlewares.
    pub gateway: GatewayConfig,

    /// Services answered by the built-in `discovery://` provider.
    pub discovery: DiscoveryConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body buffered for forwarding.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// How often the config source is re-read and hashed.
    #[serde(with = "duration_format")]
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Immutable routing snapshot, replaced wholesale on reload.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway name, used in logs.
    pub name: String,

    /// Accepted Host headers. Empty accepts any host.
    pub hosts: Vec<String>,

    /// Routable units.
    pub endpoints: Vec<EndpointConfig>,

    /// Middlewares applied to every endpoint, outside the endpoint's own.
    pub middlewares: Vec<MiddlewareConfig>,
}

/// One routable unit.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EndpointConfig {
    /// Exact path (`/api/users`) or prefix pattern (`/api/*`).
    pub path: String,

    /// HTTP method; empty or `*` matches any.
    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// Total request budget covering every retry attempt.
    #[serde(default = "default_endpoint_timeout", with = "duration_format")]
    pub timeout: Duration,

    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[serde(default)]
    pub middlewares: Vec<MiddlewareConfig>,

    #[serde(default)]
    pub load_balancer: Strategy,
}

fn default_endpoint_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Upstream wire protocol of an endpoint.
///
/// Accepts `"HTTP"`/`"GRPC"` or the numeric codes `1`/`2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Http,
    Grpc,
}

impl Protocol {
    /// URI scheme expected on discovered instance endpoints.
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Grpc => "grpc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Grpc => write!(f, "GRPC"),
        }
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(i64),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Code(1) => Ok(Protocol::Http),
            Repr::Code(2) => Ok(Protocol::Grpc),
            Repr::Name(name) if name.eq_ignore_ascii_case("http") => Ok(Protocol::Http),
            Repr::Name(name) if name.eq_ignore_ascii_case("grpc") => Ok(Protocol::Grpc),
            Repr::Code(code) => Err(serde::de::Error::custom(format!("unknown protocol code {code}"))),
            Repr::Name(name) => Err(serde::de::Error::custom(format!("unknown protocol '{name}'"))),
        }
    }
}

/// Load balancing strategy for an endpoint's node set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    WeightedRoundRobin,
    /// Power of two choices over in-flight request counts.
    P2c,
}

/// Backend target definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// `host:port`, `direct://host:port`, or `<scheme>://service[?isSecure=true]`.
    pub target: String,

    /// Weight for weighted load balancing. Discovered instances fall back to
    /// their `weight` metadata label when unset.
    #[serde(default)]
    pub weight: Option<u32>,

    /// Probe this backend's nodes with active health checks.
    #[serde(default)]
    pub health_check: bool,
}

/// File-configured service instances.
///
/// ```toml
/// [[discovery.services.orders]]
/// endpoints = ["http://10.0.0.7:8000"]
/// metadata = { weight = "20", priority = "primary" }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Instance lists keyed by service name.
    pub services: BTreeMap<String, Vec<InstanceConfig>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InstanceConfig {
    /// Defaults to `<service>-<index>`.
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub version: String,

    pub endpoints: Vec<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Retry policy for an endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub attempts: u32,

    /// Deadline for a single attempt, clamped to the remaining request budget.
    #[serde(with = "duration_format::option")]
    pub per_try_timeout: Option<Duration>,

    /// A completed response is retried when any condition matches.
    pub conditions: Vec<ConditionConfig>,

    /// Preferred node `priority` labels, indexed by attempt.
    pub priorities: Vec<String>,

    /// Avoid nodes already tried by this request.
    pub exclude_previous: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            per_try_timeout: None,
            conditions: Vec::new(),
            priorities: Vec::new(),
            exclude_previous: true,
        }
    }
}

/// Declarative retry condition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionConfig {
    /// `"429"` or `"500-599"`.
    ByStatusCode(String),
    ByHeader(HeaderCondition),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HeaderCondition {
    pub name: String,

    /// Bare string, JSON array of strings, or numeric literal.
    #[serde(deserialize_with = "raw_literal")]
    pub value: String,
}

/// Accepts a TOML string, integer or string array and keeps its raw text
/// form; arrays are re-encoded as JSON.
fn raw_literal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Literal {
        Text(String),
        Integer(i64),
        List(Vec<String>),
    }

    match Literal::deserialize(deserializer)? {
        Literal::Text(text) => Ok(text),
        Literal::Integer(n) => Ok(n.to_string()),
        Literal::List(items) => serde_json::to_string(&items).map_err(serde::de::Error::custom),
    }
}

/// Named middleware with opaque options, resolved through the registry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MiddlewareConfig {
    pub name: String,

    #[serde(default)]
    pub options: toml::Table,
}

impl MiddlewareConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: toml::Table::new(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[gateway.endpoints]]
            path = "/api/*"
            backends = [{ target = "127.0.0.1:9000" }]
            "#,
        )
        .unwrap();

        let endpoint = &config.gateway.endpoints[0];
        assert_eq!(endpoint.protocol, Protocol::Http);
        assert_eq!(endpoint.timeout, Duration::from_secs(30));
        assert_eq!(endpoint.load_balancer, Strategy::WeightedRoundRobin);
        assert!(endpoint.retry.is_none());
        assert_eq!(endpoint.backends[0].weight, None);
        assert!(!endpoint.backends[0].health_check);
    }

    #[test]
    fn test_discovery_services_parse() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[discovery.services.orders]]
            endpoints = ["http://10.0.0.1:80"]
            metadata = { weight = "20" }

            [[discovery.services.orders]]
            id = "orders-b"
            endpoints = ["http://10.0.0.2:80"]
            "#,
        )
        .unwrap();

        let orders = &config.discovery.services["orders"];
        assert_eq!(orders.len(), 2);
        assert!(orders[0].id.is_empty());
        assert_eq!(orders[0].metadata["weight"], "20");
        assert_eq!(orders[1].id, "orders-b");
    }

    #[test]
    fn test_protocol_accepts_codes_and_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            protocol: Protocol,
        }

        let by_code: Wrapper = toml::from_str("protocol = 2").unwrap();
        assert_eq!(by_code.protocol, Protocol::Grpc);
        let by_name: Wrapper = toml::from_str("protocol = \"grpc\"").unwrap();
        assert_eq!(by_name.protocol, Protocol::Grpc);
        assert!(toml::from_str::<Wrapper>("protocol = 7").is_err());
    }

    #[test]
    fn test_retry_conditions_parse() {
        let retry: RetryConfig = toml::from_str(
            r#"
            attempts = 3
            per_try_timeout = "250ms"
            conditions = [
                { by_status_code = "500-599" },
                { by_header = { name = "Grpc-Status", value = 14 } },
                { by_header = { name = "X-Retry", value = ["a", "b"] } },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(retry.attempts, 3);
        assert_eq!(retry.per_try_timeout, Some(Duration::from_millis(250)));
        assert!(retry.exclude_previous);
        assert_eq!(retry.conditions[0], ConditionConfig::ByStatusCode("500-599".into()));
        assert_eq!(
            retry.conditions[1],
            ConditionConfig::ByHeader(HeaderCondition {
                name: "Grpc-Status".into(),
                value: "14".into(),
            })
        );
        assert_eq!(
            retry.conditions[2],
            ConditionConfig::ByHeader(HeaderCondition {
                name: "X-Retry".into(),
                value: r#"["a","b"]"#.into(),
            })
        );
    }
}
