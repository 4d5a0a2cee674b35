//! Token bucket rate limiting per endpoint.
//!
//! Options: `rps` (refill rate, required) and `burst` (capacity, defaults to
//! `rps`). Requests beyond the bucket get 429 without reaching `next`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;

use crate::config::MiddlewareConfig;
use crate::middleware::{parse_options, Middleware, MiddlewareError};
use crate::observability::metrics;
use crate::transport::{ProxyRequest, ProxyResponse, RequestOptions, Transport, TransportError};

pub const NAME: &str = "rate_limit";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Options {
    rps: f64,
    burst: Option<f64>,
}

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub fn factory(config: &MiddlewareConfig) -> Result<Middleware, MiddlewareError> {
    let options: Options = parse_options(config)?;
    let burst = options.burst.unwrap_or(options.rps);
    if !(options.rps > 0.0) || !(burst >= 1.0) {
        return Err(MiddlewareError::invalid(config, "rps must be > 0 and burst >= 1"));
    }

    // One bucket per built chain, i.e. per endpoint generation.
    Ok(Arc::new(move |next: Arc<dyn Transport>| {
        Arc::new(RateLimit {
            bucket: Mutex::new(TokenBucket::new(burst, options.rps)),
            next,
        }) as Arc<dyn Transport>
    }))
}

struct RateLimit {
    bucket: Mutex<TokenBucket>,
    next: Arc<dyn Transport>,
}

impl Transport for RateLimit {
    fn round_trip<'a>(
        &'a self,
        request: ProxyRequest,
        opts: &'a mut RequestOptions,
    ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
        Box::pin(async move {
            let allowed = self.bucket.lock().try_acquire();
            if !allowed {
                tracing::warn!(endpoint = %opts.endpoint, "Rate limit exceeded");
                metrics::record_rate_limited(&opts.endpoint);
                let mut response = Response::new(Body::from("Rate limit exceeded"));
                *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                return Ok(response);
            }
            self.next.round_trip(request, opts).await
        })
    }
}
