//! HTTP client that dials through the mesh transport
//!
//! Every request opens a fresh stream to the virtual host named in its URI;
//! connections are never reused.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONNECTION, HOST};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use mesh_core::{MeshError, Result};
use mesh_transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Settings for the transport-backed HTTP client.
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// How long to wait for response headers after the request is written.
    pub response_header_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            response_header_timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP/1.1 client whose connections are virtual streams. Safe to share.
pub struct MeshHttpClient {
    transport: Arc<dyn Transport>,
    config: HttpClientConfig,
}

impl MeshHttpClient {
    pub fn new(transport: Arc<dyn Transport>, config: HttpClientConfig) -> Self {
        Self { transport, config }
    }

    /// Send a request to the virtual host in its URI and collect the response.
    pub async fn request(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let (mut parts, body) = request.into_parts();
        let authority = parts
            .uri
            .authority()
            .ok_or_else(|| MeshError::Http(format!("request URI {} has no host", parts.uri)))?
            .clone();

        let stream = self.transport.dial(authority.host()).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        let host = authority.host().to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(host = %host, error = %e, "mesh connection closed with error");
            }
        });

        let path = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        parts.uri = path
            .parse::<Uri>()
            .map_err(|e| MeshError::Http(e.to_string()))?;
        if !parts.headers.contains_key(HOST) {
            let value = HeaderValue::from_str(authority.as_str())
                .map_err(|e| MeshError::Http(e.to_string()))?;
            parts.headers.insert(HOST, value);
        }
        parts
            .headers
            .insert(CONNECTION, HeaderValue::from_static("close"));

        let request = Request::from_parts(parts, Full::new(body));
        let response = match timeout(self.config.response_header_timeout, sender.send_request(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(MeshError::Timeout(self.config.response_header_timeout)),
        };

        let (parts, body) = response.into_parts();
        let bytes = body.collect().await?.to_bytes();
        Ok(Response::from_parts(parts, bytes))
    }
}
