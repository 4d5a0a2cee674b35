//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a request
//! - Return the matched target or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Routes are ordered by specificity when added, so the first match wins:
//!   exact path, then longest prefix, then a specific method, then gRPC
//! - O(n) scan (acceptable for typical endpoint counts)

use axum::body::Body;
use axum::http::Request;

use crate::routing::matcher::{AndMatcher, GrpcMatcher, HostMatcher, Matcher, MethodMatcher, PathPattern};

type Rank = (bool, usize, bool, bool);

#[derive(Debug)]
struct Route<T> {
    rank: Rank,
    path: PathPattern,
    conditions: AndMatcher,
    target: T,
}

/// Routes of one gateway, each resolving to a `T`.
#[derive(Debug)]
pub struct Router<T> {
    hosts: HostMatcher,
    routes: Vec<Route<T>>,
}

impl<T> Router<T> {
    pub fn new(hosts: HostMatcher) -> Self {
        Self {
            hosts,
            routes: Vec::new(),
        }
    }

    /// Add a route for `pattern` (`/exact` or `/prefix/*`).
    pub fn add(&mut self, pattern: &str, method: &str, grpc_only: bool, target: T) {
        let path = PathPattern::parse(pattern);
        let method = MethodMatcher::new(method);
        let (exact, len) = path.specificity();
        let rank = (exact, len, method.is_specific(), grpc_only);

        let mut conditions: Vec<Box<dyn Matcher>> = vec![Box::new(method)];
        if grpc_only {
            conditions.push(Box::new(GrpcMatcher));
        }

        let route = Route {
            rank,
            path,
            conditions: AndMatcher::new(conditions),
            target,
        };
        // Keep descending rank order; equal ranks keep insertion order.
        let position = self.routes.partition_point(|existing| existing.rank >= route.rank);
        self.routes.insert(position, route);
    }

    /// Most specific route matching `req`, if any.
    pub fn lookup(&self, req: &Request<Body>) -> Option<&T> {
        if !self.hosts.matches(req) {
            return None;
        }
        self.routes
            .iter()
            .find(|route| route.path.matches(req) && route.conditions.matches(req))
            .map(|route| &route.target)
    }

    /// Targets in match order.
    pub fn targets(&self) -> impl Iterator<Item = &T> {
        self.routes.iter().map(|route| &route.target)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
