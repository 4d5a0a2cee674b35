//! Ensures every forwarded request carries a request ID.
//!
//! An incoming ID is kept; otherwise a UUID v4 is generated. The ID is
//! mirrored on the response when the upstream did not set one.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::MiddlewareConfig;
use crate::middleware::{parse_options, Middleware, MiddlewareError};
use crate::transport::{ProxyRequest, ProxyResponse, RequestOptions, Transport, TransportError};

pub const NAME: &str = "request_id";

pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Options {
    header: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            header: X_REQUEST_ID.to_string(),
        }
    }
}

pub fn factory(config: &MiddlewareConfig) -> Result<Middleware, MiddlewareError> {
    let options: Options = parse_options(config)?;
    let header = HeaderName::from_bytes(options.header.as_bytes())
        .map_err(|e| MiddlewareError::invalid(config, e.to_string()))?;

    Ok(Arc::new(move |next: Arc<dyn Transport>| {
        Arc::new(RequestId {
            header: header.clone(),
            next,
        }) as Arc<dyn Transport>
    }))
}

struct RequestId {
    header: HeaderName,
    next: Arc<dyn Transport>,
}

impl Transport for RequestId {
    fn round_trip<'a>(
        &'a self,
        mut request: ProxyRequest,
        opts: &'a mut RequestOptions,
    ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
        Box::pin(async move {
            let id = match request.headers().get(&self.header) {
                Some(existing) => existing.clone(),
                None => {
                    let generated = HeaderValue::from_str(&Uuid::new_v4().to_string())
                        .map_err(|e| TransportError::Upstream(e.to_string()))?;
                    request.headers_mut().insert(self.header.clone(), generated.clone());
                    generated
                }
            };

            let mut response = self.next.round_trip(request, opts).await?;
            if !response.headers().contains_key(&self.header) {
                response.headers_mut().insert(self.header.clone(), id);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{get, ScriptedTransport};
    use std::time::Duration;

    #[tokio::test]
    async fn test_generates_and_mirrors_id() {
        let terminal = ScriptedTransport::always(200);
        let transport = factory(&MiddlewareConfig::new(NAME)).unwrap()(terminal.clone());

        let mut opts = RequestOptions::new("/", Duration::from_secs(1));
        let response = transport.round_trip(get("/"), &mut opts).await.unwrap();

        let forwarded = terminal.requests.lock()[0].headers()[X_REQUEST_ID].clone();
        assert!(Uuid::parse_str(forwarded.to_str().unwrap()).is_ok());
        assert_eq!(response.headers()[X_REQUEST_ID], forwarded);
    }

    #[tokio::test]
    async fn test_keeps_incoming_id() {
        let terminal = ScriptedTransport::always(200);
        let transport = factory(&MiddlewareConfig::new(NAME)).unwrap()(terminal.clone());

        let mut request = get("/");
        request.headers_mut().insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        let mut opts = RequestOptions::new("/", Duration::from_secs(1));
        let response = transport.round_trip(request, &mut opts).await.unwrap();

        assert_eq!(terminal.requests.lock()[0].headers()[X_REQUEST_ID], "abc-123");
        assert_eq!(response.headers()[X_REQUEST_ID], "abc-123");
    }

    #[test]
    fn test_rejects_bad_header_name() {
        let mut config = MiddlewareConfig::new(NAME);
        config.options.insert("header".into(), toml::Value::String("bad header".into()));
        assert!(factory(&config).is_err());
    }
}
