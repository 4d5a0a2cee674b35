//! Terminal transport: pick a node and forward with hyper.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{Request, Response, Version};
use futures_util::future::BoxFuture;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::Protocol;
use crate::load_balancer::node::InFlightGuard;
use crate::load_balancer::NodeDirectory;
use crate::transport::forwarding::{strip_hop_by_hop, upstream_uri};
use crate::transport::{ProxyRequest, ProxyResponse, RequestOptions, Transport, TransportError};

pub type HttpClient = Client<HttpConnector, Body>;

/// Pooled client for `protocol`; gRPC uses HTTP/2 prior knowledge.
pub fn build_client(protocol: Protocol) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);

    let mut builder = Client::builder(TokioExecutor::new());
    if protocol == Protocol::Grpc {
        builder.http2_only(true);
    }
    builder.build(connector)
}

/// Forwards each attempt to a node chosen from the endpoint's directory.
pub struct NodeTransport {
    directory: Arc<NodeDirectory>,
    client: HttpClient,
    protocol: Protocol,
}

impl NodeTransport {
    pub fn new(directory: Arc<NodeDirectory>, client: HttpClient, protocol: Protocol) -> Self {
        Self {
            directory,
            client,
            protocol,
        }
    }
}

impl Transport for NodeTransport {
    fn round_trip<'a>(
        &'a self,
        request: ProxyRequest,
        opts: &'a mut RequestOptions,
    ) -> BoxFuture<'a, Result<ProxyResponse, TransportError>> {
        Box::pin(async move {
            let node = self.directory.select_for(opts)?;
            let in_flight = node.track();

            let grpc = self.protocol == Protocol::Grpc;
            let (mut parts, body) = request.into_parts();
            parts.uri = upstream_uri(&parts.uri, &node.address).map_err(TransportError::Upstream)?;
            parts.version = if grpc { Version::HTTP_2 } else { Version::HTTP_11 };
            strip_hop_by_hop(&mut parts.headers, grpc);

            tracing::debug!(
                endpoint = %opts.endpoint,
                node = %node.address,
                attempt = opts.attempt,
                "Forwarding request"
            );

            let sent: Result<Response<Incoming>, _> =
                self.client.request(Request::from_parts(parts, Body::from(body))).await;
            match sent {
                Ok(response) => {
                    let (mut parts, body) = response.into_parts();
                    strip_hop_by_hop(&mut parts.headers, false);
                    let body = TrackedBody {
                        inner: Body::new(body),
                        _in_flight: in_flight,
                    };
                    Ok(Response::from_parts(parts, Body::new(body)))
                }
                Err(e) if e.is_connect() => Err(TransportError::Connect {
                    node: node.address.clone(),
                    reason: e.to_string(),
                }),
                Err(e) => Err(TransportError::Upstream(e.to_string())),
            }
        })
    }
}

/// Response body that counts against its node until fully dropped.
struct TrackedBody {
    inner: Body,
    _in_flight: InFlightGuard,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
