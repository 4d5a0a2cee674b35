//! Upstream transport abstraction.
//!
//! # Data Flow
//! ```text
//! ProxyRouter (buffered request + RequestOptions)
//!     → middleware chain (each stage is a Transport)
//!     → RetryCoordinator (a Transport wrapping the node transport)
//!     → client.rs NodeTransport (select node, forward with hyper)
//! ```
//!
//! # Design Decisions
//! - Request bodies are buffered so each attempt can resend them
//! - Only connect failures and per-try timeouts are retryable errors
//! - Errors become HTTP statuses at the router edge, nowhere else

pub mod client;
pub mod forwarding;
pub mod options;

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::load_balancer::SelectError;

pub use client::NodeTransport;
pub use options::RequestOptions;

/// Request with a fully buffered body.
pub type ProxyRequest = Request<Bytes>;
pub type ProxyResponse = Response<Body>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no available node")]
    NoAvailableNode,

    #[error("connect to {node} failed: {reason}")]
    Connect { node: String, reason: String },

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("request canceled")]
    Canceled,

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl TransportError {
    /// Dial failures and per-try timeouts may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect { .. } | TransportError::Timeout(_))
    }

    /// Status returned to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::NoAvailableNode => StatusCode::SERVICE_UNAVAILABLE,
            TransportError::Timeout(_) | TransportError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            TransportError::Connect { .. } | TransportError::Canceled | TransportError::Upstream(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl From<SelectError> for TransportError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::NoAvailableNode => TransportError::NoAvailableNode,
        }
    }
}

/// One hop of the request pipeline.
pub trait Transport: Send + Sync {
    fn round_trip<'a>(
        &'a self,
        request: ProxyRequest,
        opts: &'a mut RequestOptions,
    ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>>;
}

/// Copy method, URI, version, headers and body of `request`.
pub fn clone_request(request: &ProxyRequest) -> ProxyRequest {
    let mut clone = Request::new(request.body().clone());
    *clone.method_mut() = request.method().clone();
    *clone.uri_mut() = request.uri().clone();
    *clone.version_mut() = request.version();
    *clone.headers_mut() = request.headers().clone();
    clone
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transports for unit tests.

    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// What one scripted call produces.
    #[derive(Debug, Clone)]
    pub enum Step {
        Status(u16),
        Fail(TransportError),
        /// Sleep before answering with the status.
        Slow(Duration, u16),
    }

    /// Replays `steps` in order, repeating the last one forever.
    pub struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        last: Mutex<Option<Step>>,
        pub calls: Arc<Mutex<Vec<u32>>>,
        pub requests: Arc<Mutex<Vec<ProxyRequest>>>,
    }

    impl ScriptedTransport {
        pub fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                last: Mutex::new(None),
                calls: Arc::new(Mutex::new(Vec::new())),
                requests: Arc::new(Mutex::new(Vec::new())),
            })
        }

        pub fn always(status: u16) -> Arc<Self> {
            Self::new(vec![Step::Status(status)])
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn next_step(&self) -> Step {
            let mut steps = self.steps.lock();
            let mut last = self.last.lock();
            if let Some(step) = steps.pop_front() {
                *last = Some(step.clone());
                return step;
            }
            last.clone().unwrap_or(Step::Status(200))
        }
    }

    pub fn status_response(status: u16) -> ProxyResponse {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::from_u16(status).unwrap();
        response
    }

    impl Transport for ScriptedTransport {
        fn round_trip<'a>(
            &'a self,
            request: ProxyRequest,
            opts: &'a mut RequestOptions,
        ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
            Box::pin(async move {
                self.calls.lock().push(opts.attempt);
                self.requests.lock().push(request);
                match self.next_step() {
                    Step::Status(code) => Ok(status_response(code)),
                    Step::Fail(err) => Err(err),
                    Step::Slow(delay, code) => {
                        tokio::time::sleep(delay).await;
                        Ok(status_response(code))
                    }
                }
            })
        }
    }

    pub fn get(path: &str) -> ProxyRequest {
        Request::builder().uri(path).body(Bytes::new()).unwrap()
    }
}
