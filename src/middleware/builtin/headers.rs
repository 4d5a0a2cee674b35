//! Sets and removes forwarded request headers.
//!
//! ```toml
//! [[gateway.middlewares]]
//! name = "headers"
//! options = { set = { "x-env" = "prod" }, remove = ["cookie"] }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use futures_util::future::BoxFuture;
use serde::Deserialize;

use crate::config::MiddlewareConfig;
use crate::middleware::{parse_options, Middleware, MiddlewareError};
use crate::transport::{ProxyRequest, ProxyResponse, RequestOptions, Transport, TransportError};

pub const NAME: &str = "headers";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Options {
    set: HashMap<String, String>,
    remove: Vec<String>,
}

#[derive(Debug)]
struct Rules {
    set: Vec<(HeaderName, HeaderValue)>,
    remove: Vec<HeaderName>,
}

pub fn factory(config: &MiddlewareConfig) -> Result<Middleware, MiddlewareError> {
    let options: Options = parse_options(config)?;
    let invalid = |e: &dyn std::fmt::Display| MiddlewareError::invalid(config, e.to_string());

    let mut set = Vec::with_capacity(options.set.len());
    for (name, value) in &options.set {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(&e))?;
        let value = HeaderValue::from_str(value).map_err(|e| invalid(&e))?;
        set.push((name, value));
    }
    let remove = options
        .remove
        .iter()
        .map(|name| HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(&e)))
        .collect::<Result<Vec<_>, _>>()?;

    let rules = Arc::new(Rules { set, remove });
    Ok(Arc::new(move |next: Arc<dyn Transport>| {
        Arc::new(HeaderRewrite {
            rules: rules.clone(),
            next,
        }) as Arc<dyn Transport>
    }))
}

struct HeaderRewrite {
    rules: Arc<Rules>,
    next: Arc<dyn Transport>,
}

impl Transport for HeaderRewrite {
    fn round_trip<'a>(
        &'a self,
        mut request: ProxyRequest,
        opts: &'a mut RequestOptions,
    ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
        let headers = request.headers_mut();
        for name in &self.rules.remove {
            headers.remove(name);
        }
        for (name, value) in &self.rules.set {
            headers.insert(name.clone(), value.clone());
        }
        self.next.round_trip(request, opts)
    }
}
