//! Request forwarding through the mesh

use crate::client::MeshHttpClient;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode, Uri};
use mesh_core::{HandlerResponse, MeshError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Forwards buffered requests to virtual hosts, mapping backend failures to
/// gateway errors instead of returning them.
#[derive(Clone)]
pub struct RequestForwarder {
    client: Arc<MeshHttpClient>,
}

impl RequestForwarder {
    pub fn new(client: Arc<MeshHttpClient>) -> Self {
        Self { client }
    }

    /// Forward `request` to `uri` and return the backend's response.
    pub async fn forward_to(&self, uri: Uri, request: Request<Bytes>) -> Result<Response<Bytes>> {
        debug!("Forwarding request to: {}", uri);

        let (mut parts, body) = request.into_parts();

        let mut filtered_headers = HeaderMap::new();
        for (k, v) in parts.headers.iter() {
            if !Self::is_hop_by_hop_header(k.as_str()) {
                filtered_headers.append(k.clone(), v.clone());
            }
        }
        parts.headers = filtered_headers;
        // the original Host belongs to the caller, not the target
        parts.headers.remove(hyper::header::HOST);
        parts.uri = uri;

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                debug!("Backend responded with status: {}", response.status());
                Ok(response)
            }
            Err(MeshError::Timeout(after)) => {
                warn!("Backend request timeout after {}s", after.as_secs());
                Ok(Self::error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    "Backend service request timeout",
                ))
            }
            Err(e) => {
                warn!("Backend request error: {}", e);
                Ok(Self::error_response(
                    StatusCode::BAD_GATEWAY,
                    "Error communicating with backend service",
                ))
            }
        }
    }

    /// Create an error response
    fn error_response(status: StatusCode, message: &str) -> Response<Bytes> {
        let mut response = Response::new(Bytes::from(format!("{}\n", message)));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// Check if header is hop-by-hop (should not be forwarded)
    pub fn is_hop_by_hop_header(name: &str) -> bool {
        matches!(
            name.to_ascii_lowercase().as_str(),
            "connection"
                | "keep-alive"
                | "proxy-authenticate"
                | "proxy-authorization"
                | "te"
                | "trailers"
                | "transfer-encoding"
                | "upgrade"
        )
    }
}

/// Re-wrap a collected response for a router handler.
pub fn into_handler_response(response: Response<Bytes>) -> HandlerResponse {
    let (mut parts, body) = response.into_parts();
    for name in ["connection", "keep-alive", "transfer-encoding"] {
        parts.headers.remove(name);
    }
    Response::from_parts(parts, Full::new(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpClientConfig;
    use crate::http::text_response;
    use crate::server::serve_virtual;
    use mesh_transport::{MemoryFabric, Transport};

    fn forwarder(transport: Arc<dyn Transport>) -> RequestForwarder {
        RequestForwarder::new(Arc::new(MeshHttpClient::new(
            transport,
            HttpClientConfig::default(),
        )))
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(RequestForwarder::is_hop_by_hop_header("connection"));
        assert!(RequestForwarder::is_hop_by_hop_header("Keep-Alive"));
        assert!(RequestForwarder::is_hop_by_hop_header("transfer-encoding"));
        assert!(!RequestForwarder::is_hop_by_hop_header("content-type"));
        assert!(!RequestForwarder::is_hop_by_hop_header("authorization"));
    }

    #[test]
    fn test_error_response() {
        let response = RequestForwarder::error_response(StatusCode::BAD_GATEWAY, "Test error");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.body().as_ref(), b"Test error\n");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_502() {
        let fabric = MemoryFabric::new();
        let transport: Arc<dyn Transport> = Arc::new(fabric.transport(&["test".to_string()]));
        let request = Request::builder().uri("/x").body(Bytes::new()).unwrap();

        let response = forwarder(transport)
            .forward_to(Uri::from_static("http://meshrpc.gone/x"), request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_forward_strips_hop_by_hop() {
        let fabric = MemoryFabric::new();
        let transport: Arc<dyn Transport> = Arc::new(fabric.transport(&["test".to_string()]));
        let listener = transport.bind("meshrpc.echo").await.unwrap();
        tokio::spawn(serve_virtual(
            listener,
            Arc::new(|req: Request<hyper::body::Incoming>| {
                Box::pin(async move {
                    let seen = req.headers().contains_key("upgrade");
                    text_response(StatusCode::OK, format!("upgrade={}", seen))
                }) as futures::future::BoxFuture<'static, _>
            }),
        ));

        let request = Request::builder()
            .uri("/anything")
            .header("upgrade", "websocket")
            .body(Bytes::new())
            .unwrap();
        let response = forwarder(transport)
            .forward_to(Uri::from_static("http://meshrpc.echo/anything"), request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"upgrade=false");
    }
}
