//! Request-scoped options shared by every stage of one request.
//!
//! Middlewares, the retry coordinator and the node transport all receive the
//! same `&mut RequestOptions`; anything an outer stage writes is visible to
//! the inner stages and, on the way back, to the outer ones.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::load_balancer::{Node, NodeFilter};

pub struct RequestOptions {
    /// Path pattern of the matched endpoint.
    pub endpoint: String,
    /// Selection filters for the whole request.
    pub filters: Vec<NodeFilter>,
    /// Selection filters for the current attempt only; reset per attempt.
    pub attempt_filters: Vec<NodeFilter>,
    /// Addresses picked so far, in attempt order.
    pub used_nodes: Vec<String>,
    /// Node picked by the latest attempt.
    pub current_node: Option<Arc<Node>>,
    /// 1-based number of the current attempt; 0 before the first.
    pub attempt: u32,
    /// No retry follows the current attempt.
    pub last_attempt: bool,
    /// Upstream status of every completed attempt.
    pub upstream_statuses: Vec<StatusCode>,
    /// End of the total request budget.
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl RequestOptions {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            filters: Vec::new(),
            attempt_filters: Vec::new(),
            used_nodes: Vec::new(),
            current_node: None,
            attempt: 0,
            last_attempt: false,
            upstream_statuses: Vec::new(),
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Budget left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Start attempt `attempt` of `max_attempts`.
    pub fn begin_attempt(&mut self, attempt: u32, max_attempts: u32) {
        self.attempt = attempt;
        self.last_attempt = attempt >= max_attempts;
        self.attempt_filters.clear();
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("endpoint", &self.endpoint)
            .field("filters", &self.filters.len())
            .field("attempt_filters", &self.attempt_filters.len())
            .field("used_nodes", &self.used_nodes)
            .field("attempt", &self.attempt)
            .field("last_attempt", &self.last_attempt)
            .field("upstream_statuses", &self.upstream_statuses)
            .finish()
    }
}
