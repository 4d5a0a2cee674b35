//! Route matching logic.
//!
//! # Responsibilities
//! - Match the Host header against the gateway's host list
//! - Match the path against an exact or prefix pattern
//! - Match the method and, for gRPC endpoints, the content type
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::body::Body;
use axum::http::{header, Method, Request};

use crate::config::validation::normalized_method;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Matches the Host header against a list of accepted hosts.
#[derive(Debug, Clone, Default)]
pub struct HostMatcher {
    hosts: Vec<String>,
}

impl HostMatcher {
    /// Hosts are normalized to lowercase; an empty list accepts any host.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| strip_port(h.as_ref().trim()).to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().host());
        host.map(|h| strip_port(h).to_lowercase())
            .is_some_and(|h| self.hosts.contains(&h))
    }
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literal: keep everything up to the closing bracket.
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map_or(host, |(name, _)| name)
}

/// Endpoint path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// `/api/users` matches only itself.
    Exact(String),
    /// `/api/*` matches `/api` and everything below it.
    Prefix(String),
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix("/*") {
            Some(base) => PathPattern::Prefix(base.to_string()),
            None => PathPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches_path(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Prefix(base) => {
                path == base
                    || path
                        .strip_prefix(base.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }

    /// Ordering key: exact beats prefix, longer prefix beats shorter.
    pub fn specificity(&self) -> (bool, usize) {
        match self {
            PathPattern::Exact(exact) => (true, exact.len()),
            PathPattern::Prefix(base) => (false, base.len()),
        }
    }
}

impl Matcher for PathPattern {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matches_path(req.uri().path())
    }
}

/// Matches the request method; `None` accepts any method.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    method: Option<Method>,
}

impl MethodMatcher {
    pub fn new(method: &str) -> Self {
        let normalized = normalized_method(method);
        Self {
            method: (normalized != "*")
                .then(|| Method::from_bytes(normalized.as_bytes()).ok())
                .flatten(),
        }
    }

    pub fn is_specific(&self) -> bool {
        self.method.is_some()
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.method.as_ref().map_or(true, |m| req.method() == m)
    }
}

/// Matches gRPC requests by content type.
#[derive(Debug, Clone, Copy)]
pub struct GrpcMatcher;

impl Matcher for GrpcMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        req.headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/grpc"))
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}
