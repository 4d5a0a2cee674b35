//! Retry coordination.
//!
//! # Responsibilities
//! - Drive up to `attempts` sequential attempts against the inner transport
//! - Bound every attempt by min(remaining budget, per-try timeout)
//! - Decide retryability from conditions or the transport error kind
//! - Steer later attempts away from nodes already used
//!
//! # Design Decisions
//! - Cancellation is checked before every attempt and raced during one
//! - No backoff between attempts; a retry goes to a different node
//! - Exhaustion returns the last outcome unchanged

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::config::RetryConfig;
use crate::load_balancer::filters;
use crate::observability::metrics;
use crate::resilience::conditions::{judge_all, prepare_all, CompiledCondition, ConditionError};
use crate::transport::{clone_request, ProxyRequest, ProxyResponse, RequestOptions, Transport, TransportError};

/// Node metadata label matched against `priorities`.
pub const PRIORITY_LABEL: &str = "priority";

/// Compiled retry settings of one endpoint.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    per_try_timeout: Option<Duration>,
    conditions: Vec<CompiledCondition>,
    priorities: Vec<String>,
    exclude_previous: bool,
}

impl RetryPolicy {
    /// Compile `config`; no config means a single attempt.
    pub fn from_config(config: Option<&RetryConfig>) -> Result<Self, ConditionError> {
        let defaults = RetryConfig::default();
        let config = config.unwrap_or(&defaults);
        Ok(Self {
            attempts: config.attempts.max(1),
            per_try_timeout: config.per_try_timeout,
            conditions: prepare_all(&config.conditions)?,
            priorities: config.priorities.clone(),
            exclude_previous: config.exclude_previous,
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Preferred priority label for 1-based `attempt`.
    fn priority_for(&self, attempt: u32) -> Option<&String> {
        let last = self.priorities.len().checked_sub(1)?;
        let index = (attempt.saturating_sub(1) as usize).min(last);
        self.priorities.get(index)
    }
}

/// Transport that retries its inner transport according to a policy.
pub struct RetryCoordinator {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    fn install_filters(&self, attempt: u32, opts: &mut RequestOptions) {
        if attempt > 1 && self.policy.exclude_previous {
            let used: HashSet<String> = opts.used_nodes.iter().cloned().collect();
            opts.attempt_filters.push(filters::exclude_addresses(used));
        }
        if let Some(priority) = self.policy.priority_for(attempt) {
            opts.attempt_filters
                .push(filters::prefer_label(PRIORITY_LABEL.to_string(), priority.clone()));
        }
    }

    async fn attempt(
        &self,
        request: ProxyRequest,
        opts: &mut RequestOptions,
        budget: Duration,
    ) -> Result<ProxyResponse, TransportError> {
        let cancel = opts.cancel.clone();
        let outcome = {
            let call = tokio::time::timeout(budget, self.inner.round_trip(request, opts));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Canceled),
                result = call => result.unwrap_or(Err(TransportError::Timeout(budget))),
            }
        };

        match outcome {
            Err(TransportError::Timeout(_)) if opts.remaining().is_zero() => Err(TransportError::DeadlineExceeded),
            other => other,
        }
    }
}

impl Transport for RetryCoordinator {
    fn round_trip<'a>(
        &'a self,
        request: ProxyRequest,
        opts: &'a mut RequestOptions,
    ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
        Box::pin(async move {
            let max_attempts = self.policy.attempts;
            let mut attempt = 0;

            loop {
                attempt += 1;

                if opts.cancel.is_cancelled() {
                    return Err(TransportError::Canceled);
                }
                let remaining = opts.remaining();
                if remaining.is_zero() {
                    return Err(TransportError::DeadlineExceeded);
                }
                let budget = self
                    .policy
                    .per_try_timeout
                    .map_or(remaining, |per_try| per_try.min(remaining));

                opts.begin_attempt(attempt, max_attempts);
                self.install_filters(attempt, opts);

                let outcome = self.attempt(clone_request(&request), opts, budget).await;

                let (retryable, reason) = match &outcome {
                    Ok(response) => {
                        opts.upstream_statuses.push(response.status());
                        (judge_all(&self.policy.conditions, response, false), "condition")
                    }
                    Err(err) => (err.is_retryable(), "transport"),
                };

                if opts.last_attempt || !retryable {
                    return outcome;
                }

                tracing::debug!(
                    endpoint = %opts.endpoint,
                    attempt,
                    node = ?opts.used_nodes.last(),
                    outcome = %describe(&outcome),
                    "Retrying request"
                );
                metrics::record_retry(&opts.endpoint, reason);
            }
        })
    }
}

fn describe(outcome: &Result<ProxyResponse, TransportError>) -> String {
    match outcome {
        Ok(response) => response.status().to_string(),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ConditionConfig, EndpointConfig, Protocol, Strategy};
    use crate::discovery::{DiscoveryProvider, DiscoveryRegistry, ServiceInstance, StaticDiscovery, WatchHub};
    use crate::load_balancer::NodeDirectory;
    use crate::transport::testing::{get, status_response, ScriptedTransport, Step};
    use axum::http::StatusCode;
    use tokio_util::sync::CancellationToken;

    fn policy(attempts: u32, codes: &[&str]) -> RetryPolicy {
        let config = RetryConfig {
            attempts,
            conditions: codes
                .iter()
                .map(|c| ConditionConfig::ByStatusCode(c.to_string()))
                .collect(),
            ..Default::default()
        };
        RetryPolicy::from_config(Some(&config)).unwrap()
    }

    fn opts(timeout: Duration) -> RequestOptions {
        RequestOptions::new("/orders", timeout)
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_response() {
        let transport = ScriptedTransport::always(500);
        let retry = RetryCoordinator::new(transport.clone(), policy(3, &["500-599"]));

        let mut opts = opts(Duration::from_secs(5));
        let response = retry.round_trip(get("/orders"), &mut opts).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(transport.call_count(), 3);
        assert_eq!(*transport.calls.lock(), [1, 2, 3]);
        assert_eq!(opts.upstream_statuses.len(), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_matching_failures() {
        let transport = ScriptedTransport::new(vec![Step::Status(503), Step::Status(503), Step::Status(200)]);
        let retry = RetryCoordinator::new(transport.clone(), policy(5, &["502-504"]));

        let response = retry.round_trip(get("/orders"), &mut opts(Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_matching_response_is_not_retried() {
        let transport = ScriptedTransport::always(404);
        let retry = RetryCoordinator::new(transport.clone(), policy(3, &["500-599"]));

        let response = retry.round_trip(get("/orders"), &mut opts(Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_conditions_never_retries_responses() {
        let transport = ScriptedTransport::always(500);
        let retry = RetryCoordinator::new(transport.clone(), policy(3, &[]));

        retry.round_trip(get("/orders"), &mut opts(Duration::from_secs(5))).await.unwrap();
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt_makes_no_calls() {
        let transport = ScriptedTransport::always(200);
        let retry = RetryCoordinator::new(transport.clone(), policy(3, &["500-599"]));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut opts = opts(Duration::from_secs(5)).with_cancel(cancel);

        let err = retry.round_trip(get("/orders"), &mut opts).await.unwrap_err();
        assert_eq!(err, TransportError::Canceled);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt_stops_retrying() {
        let slow = ScriptedTransport::new(vec![Step::Slow(Duration::from_secs(10), 500)]);
        let retry = RetryCoordinator::new(slow.clone(), policy(3, &["500-599"]));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut opts = opts(Duration::from_secs(60)).with_cancel(cancel);
        let err = retry.round_trip(get("/orders"), &mut opts).await.unwrap_err();
        assert_eq!(err, TransportError::Canceled);
        assert_eq!(slow.call_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_errors_are_retried() {
        let refused = TransportError::Connect {
            node: "10.0.0.1:80".into(),
            reason: "connection refused".into(),
        };
        let transport = ScriptedTransport::new(vec![Step::Fail(refused.clone()), Step::Status(200)]);
        let retry = RetryCoordinator::new(transport.clone(), policy(2, &[]));

        let response = retry.round_trip(get("/orders"), &mut opts(Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let failing = ScriptedTransport::new(vec![Step::Fail(refused.clone())]);
        let retry = RetryCoordinator::new(failing.clone(), policy(2, &[]));
        let err = retry.round_trip(get("/orders"), &mut opts(Duration::from_secs(5))).await.unwrap_err();
        assert_eq!(err, refused);
        assert_eq!(failing.call_count(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let transport = ScriptedTransport::new(vec![Step::Fail(TransportError::NoAvailableNode)]);
        let retry = RetryCoordinator::new(transport.clone(), policy(3, &["500-599"]));

        let err = retry.round_trip(get("/orders"), &mut opts(Duration::from_secs(5))).await.unwrap_err();
        assert_eq!(err, TransportError::NoAvailableNode);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_try_timeout_is_retried() {
        let transport = ScriptedTransport::new(vec![Step::Slow(Duration::from_secs(2), 200), Step::Status(200)]);
        let config = RetryConfig {
            attempts: 2,
            per_try_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let retry = RetryCoordinator::new(transport.clone(), RetryPolicy::from_config(Some(&config)).unwrap());

        let response = retry.round_trip(get("/orders"), &mut opts(Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_further_attempts() {
        let transport = ScriptedTransport::new(vec![Step::Slow(Duration::from_secs(2), 200)]);
        let retry = RetryCoordinator::new(transport.clone(), policy(3, &["500-599"]));

        let err = retry
            .round_trip(get("/orders"), &mut opts(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::DeadlineExceeded);
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn test_priority_for_clamps_to_last() {
        let config = RetryConfig {
            attempts: 3,
            priorities: vec!["primary".into(), "backup".into()],
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(Some(&config)).unwrap();
        assert_eq!(policy.priority_for(1).map(String::as_str), Some("primary"));
        assert_eq!(policy.priority_for(2).map(String::as_str), Some("backup"));
        assert_eq!(policy.priority_for(3).map(String::as_str), Some("backup"));
        assert!(RetryPolicy::from_config(None).unwrap().priority_for(1).is_none());
    }

    #[test]
    fn test_malformed_condition_fails_compile() {
        let config = RetryConfig {
            conditions: vec![ConditionConfig::ByStatusCode("5xx".into())],
            ..Default::default()
        };
        assert!(RetryPolicy::from_config(Some(&config)).is_err());
    }

    /// Selects through a real directory, then answers 503 without I/O.
    struct SelectingTransport {
        directory: Arc<NodeDirectory>,
    }

    impl Transport for SelectingTransport {
        fn round_trip<'a>(
            &'a self,
            _request: ProxyRequest,
            opts: &'a mut RequestOptions,
        ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
            Box::pin(async move {
                self.directory.select_for(opts)?;
                Ok(status_response(503))
            })
        }
    }

    fn endpoint(targets: &[&str]) -> EndpointConfig {
        EndpointConfig {
            path: "/orders".into(),
            method: String::new(),
            protocol: Protocol::Http,
            timeout: Duration::from_secs(5),
            backends: targets
                .iter()
                .map(|t| BackendConfig {
                    target: t.to_string(),
                    weight: None,
                    health_check: false,
                })
                .collect(),
            retry: None,
            middlewares: Vec::new(),
            load_balancer: Strategy::WeightedRoundRobin,
        }
    }

    #[tokio::test]
    async fn test_retry_excludes_previous_nodes() {
        let directory = NodeDirectory::new("/orders", Protocol::Http, Strategy::WeightedRoundRobin);
        directory
            .apply(&endpoint(&["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]), &DiscoveryRegistry::new(), &WatchHub::new())
            .unwrap();
        let retry = RetryCoordinator::new(Arc::new(SelectingTransport { directory }), policy(3, &["503"]));

        let mut opts = opts(Duration::from_secs(5));
        retry.round_trip(get("/orders"), &mut opts).await.unwrap();

        let distinct: HashSet<&String> = opts.used_nodes.iter().collect();
        assert_eq!(opts.used_nodes.len(), 3);
        assert_eq!(distinct.len(), 3);
    }

    #[tokio::test]
    async fn test_exclusion_fails_open_with_single_node() {
        let directory = NodeDirectory::new("/orders", Protocol::Http, Strategy::WeightedRoundRobin);
        directory
            .apply(&endpoint(&["10.0.0.1:80"]), &DiscoveryRegistry::new(), &WatchHub::new())
            .unwrap();
        let retry = RetryCoordinator::new(Arc::new(SelectingTransport { directory }), policy(2, &["503"]));

        let mut opts = opts(Duration::from_secs(5));
        let response = retry.round_trip(get("/orders"), &mut opts).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(opts.used_nodes, ["10.0.0.1:80", "10.0.0.1:80"]);
    }

    #[tokio::test]
    async fn test_priorities_steer_attempts() {
        let provider = Arc::new(StaticDiscovery::new());
        provider.push(
            "orders",
            vec![
                ServiceInstance::new("b", vec!["http://10.0.0.2:80".into()]).with_metadata(PRIORITY_LABEL, "backup"),
                ServiceInstance::new("p", vec!["http://10.0.0.1:80".into()]).with_metadata(PRIORITY_LABEL, "primary"),
            ],
        );
        let mut registry = DiscoveryRegistry::new();
        registry.register_default(provider.clone() as Arc<dyn DiscoveryProvider>);

        let directory = NodeDirectory::new("/orders", Protocol::Http, Strategy::WeightedRoundRobin);
        directory
            .apply(&endpoint(&["discovery://orders"]), &registry, &WatchHub::new())
            .unwrap();
        for _ in 0..100 {
            if directory.nodes().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let config = RetryConfig {
            attempts: 2,
            conditions: vec![ConditionConfig::ByStatusCode("503".into())],
            priorities: vec!["primary".into(), "backup".into()],
            exclude_previous: false,
            ..Default::default()
        };
        let retry = RetryCoordinator::new(
            Arc::new(SelectingTransport { directory }),
            RetryPolicy::from_config(Some(&config)).unwrap(),
        );

        let mut opts = opts(Duration::from_secs(5));
        retry.round_trip(get("/orders"), &mut opts).await.unwrap();
        assert_eq!(opts.used_nodes, ["10.0.0.1:80", "10.0.0.2:80"]);
    }
}
