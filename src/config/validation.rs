//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, attempts >= 1, weights > 0)
//! - Detect conflicting endpoints
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Target schemes, middleware names and condition literals are resolved
//!   later, at endpoint build time, against the live registries

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::{DiscoveryConfig, EndpointConfig, GatewayConfig, ProxyConfig};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("endpoint path '{path}' must start with '/'")]
    RelativePath { path: String },

    #[error("endpoint path '{path}' may only use '*' as a trailing '/*'")]
    MisplacedWildcard { path: String },

    #[error("duplicate endpoint {method} {path} ({protocol})")]
    DuplicateEndpoint {
        method: String,
        path: String,
        protocol: String,
    },

    #[error("endpoint '{path}' has no backends")]
    NoBackends { path: String },

    #[error("endpoint '{path}' has an empty backend target")]
    EmptyTarget { path: String },

    #[error("endpoint '{path}' backend '{target}' has weight 0")]
    ZeroWeight { path: String, target: String },

    #[error("endpoint '{path}' timeout must be greater than zero")]
    ZeroTimeout { path: String },

    #[error("endpoint '{path}' retry attempts must be at least 1")]
    ZeroAttempts { path: String },

    #[error("middleware name must not be empty")]
    EmptyMiddlewareName,

    #[error("watcher poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("discovery service '{service}' instance {index} has no endpoints")]
    NoInstanceEndpoints { service: String, index: usize },
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if config.watcher.poll_interval == Duration::ZERO {
        errors.push(ValidationError::ZeroPollInterval);
    }
    validate_gateway(&config.gateway, &mut errors);
    validate_discovery(&config.discovery, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_gateway(gateway: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    if gateway.middlewares.iter().any(|m| m.name.trim().is_empty()) {
        errors.push(ValidationError::EmptyMiddlewareName);
    }

    let mut seen = HashSet::new();
    for endpoint in &gateway.endpoints {
        validate_endpoint(endpoint, errors);

        let method = normalized_method(&endpoint.method);
        if !seen.insert((method.clone(), endpoint.path.clone(), endpoint.protocol)) {
            errors.push(ValidationError::DuplicateEndpoint {
                method,
                path: endpoint.path.clone(),
                protocol: endpoint.protocol.to_string(),
            });
        }
    }
}

fn validate_discovery(discovery: &DiscoveryConfig, errors: &mut Vec<ValidationError>) {
    for (service, instances) in &discovery.services {
        for (index, instance) in instances.iter().enumerate() {
            if instance.endpoints.iter().all(|e| e.trim().is_empty()) {
                errors.push(ValidationError::NoInstanceEndpoints {
                    service: service.clone(),
                    index,
                });
            }
        }
    }
}

fn validate_endpoint(endpoint: &EndpointConfig, errors: &mut Vec<ValidationError>) {
    let path = &endpoint.path;

    if !path.starts_with('/') {
        errors.push(ValidationError::RelativePath { path: path.clone() });
    }
    let wildcard_ok = match path.find('*') {
        None => true,
        Some(pos) => pos == path.len() - 1 && path.ends_with("/*"),
    };
    if !wildcard_ok {
        errors.push(ValidationError::MisplacedWildcard { path: path.clone() });
    }

    if endpoint.timeout == Duration::ZERO {
        errors.push(ValidationError::ZeroTimeout { path: path.clone() });
    }

    if endpoint.backends.is_empty() {
        errors.push(ValidationError::NoBackends { path: path.clone() });
    }
    for backend in &endpoint.backends {
        if backend.target.trim().is_empty() {
            errors.push(ValidationError::EmptyTarget { path: path.clone() });
        }
        if backend.weight == Some(0) {
            errors.push(ValidationError::ZeroWeight {
                path: path.clone(),
                target: backend.target.clone(),
            });
        }
    }

    if endpoint.retry.as_ref().is_some_and(|r| r.attempts == 0) {
        errors.push(ValidationError::ZeroAttempts { path: path.clone() });
    }

    if endpoint.middlewares.iter().any(|m| m.name.trim().is_empty()) {
        errors.push(ValidationError::EmptyMiddlewareName);
    }
}

/// Uppercased method, `*` for "any".
pub fn normalized_method(method: &str) -> String {
    let method = method.trim();
    if method.is_empty() || method == "*" {
        "*".to_string()
    } else {
        method.to_ascii_uppercase()
    }
}
