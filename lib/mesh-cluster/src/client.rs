//! RPC and reverse-proxy client for one handler of another service
//!
//! A `Client` is an immutable value: `use_method` returns a new client and
//! never touches the receiver, so clients can be cloned freely across tasks.

use futures::future::{BoxFuture, FutureExt};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response, StatusCode, Uri};
use mesh_core::endpoint::rewrite_path;
use mesh_core::{service_fqdn, EndpointInfo, HandlerFn, HandlerRequest, HandlerResponse, MeshError, Result};
use mesh_proxy::http::{internal_error_response, text_response};
use mesh_proxy::loopback::{ProxyError, ERROR_PATH};
use mesh_proxy::{into_handler_response, MeshHttpClient, RequestForwarder};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

/// Request extension naming another method of the client's spec to call
/// instead of the bound one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodOverride(pub String);

#[derive(Clone, Default)]
pub struct Client {
    endpoint: Option<Arc<EndpointInfo>>,
    http: Option<Arc<MeshHttpClient>>,
    /// FQDN of the node that minted this client.
    local_host: String,
    method: Option<String>,
    proxy: bool,
}

impl Client {
    /// Client for `endpoint`. A non-empty `method` turns on reverse-proxy
    /// mode.
    pub fn new(
        endpoint: EndpointInfo,
        http: Arc<MeshHttpClient>,
        local_host: impl Into<String>,
        method: &str,
    ) -> Self {
        let method = (!method.is_empty()).then(|| method.to_string());
        Self {
            endpoint: Some(Arc::new(endpoint)),
            http: Some(http),
            local_host: local_host.into(),
            proxy: method.is_some(),
            method,
        }
    }

    /// Client that sends requests as they are, without an endpoint.
    pub fn unbound(http: Arc<MeshHttpClient>, local_host: impl Into<String>) -> Self {
        Self {
            http: Some(http),
            local_host: local_host.into(),
            ..Self::default()
        }
    }

    pub fn endpoint(&self) -> Option<&EndpointInfo> {
        self.endpoint.as_deref()
    }

    /// Method bound by `use_method` or at construction.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy
    }

    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    /// Send one request to the bound endpoint.
    ///
    /// Returns `Ok(None)` when the client has no HTTP client at all (a
    /// default-constructed value).
    pub async fn do_request(&self, mut request: Request<Bytes>) -> Result<Option<Response<Bytes>>> {
        let Some(http) = &self.http else {
            return Ok(None);
        };
        let Some(endpoint) = &self.endpoint else {
            return http.request(request).await.map(Some);
        };

        let mut path = endpoint.path.clone();
        if let Some(MethodOverride(name)) = request.extensions_mut().remove::<MethodOverride>() {
            if !endpoint.is_valid_handler(&name) {
                return Err(MeshError::InvalidHandler(name));
            }
            path = rewrite_path(&name, &path);
        }

        if !endpoint.method_allowed(request.method().as_str()) {
            return Err(MeshError::MethodNotAllowed {
                method: request.method().to_string(),
                path,
                allowed: endpoint.methods.clone(),
            });
        }

        *request.uri_mut() = target_uri(&endpoint.service, &path, request.uri().query())?;
        request.headers_mut().remove(HOST);
        debug!(uri = %request.uri(), method = %request.method(), "mesh request");
        http.request(request).await.map(Some)
    }

    /// New client bound to another method of the same spec, in reverse-proxy
    /// mode. The receiver is left as it was.
    pub fn use_method(&self, name: &str) -> Client {
        let Some(endpoint) = &self.endpoint else {
            return self.clone();
        };
        if name.is_empty() {
            return self.clone();
        }
        Client {
            endpoint: Some(Arc::new(endpoint.with_method_name(name))),
            method: Some(name.to_string()),
            proxy: true,
            ..self.clone()
        }
    }

    /// Rewrite an inbound request for the bound endpoint. A verb the endpoint
    /// does not allow is turned into a POST to this node's `/__error__`
    /// route carrying a 400.
    pub fn direct(&self, request: Request<Bytes>) -> Result<Request<Bytes>> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| MeshError::Http("client has no endpoint".to_string()))?;
        let (mut parts, body) = request.into_parts();

        if !endpoint.method_allowed(parts.method.as_str()) {
            let err = MeshError::MethodNotAllowed {
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
                allowed: endpoint.methods.clone(),
            };
            let payload = serde_json::to_vec(&ProxyError::new(StatusCode::BAD_REQUEST, err.to_string()))?;
            parts.method = Method::POST;
            parts.uri = format!("http://{}{}", self.local_host, ERROR_PATH)
                .parse::<Uri>()
                .map_err(|e| MeshError::Http(e.to_string()))?;
            parts.headers.remove(HOST);
            parts
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
            return Ok(Request::from_parts(parts, Bytes::from(payload)));
        }

        parts.uri = target_uri(&endpoint.service, &endpoint.path, parts.uri.query())?;
        parts.headers.remove(HOST);
        Ok(Request::from_parts(parts, body))
    }

    /// Reverse-proxy one buffered request through the mesh.
    pub async fn proxy(&self, request: HandlerRequest) -> HandlerResponse {
        let Some(http) = self.http.as_ref().filter(|_| self.proxy) else {
            return internal_error_response("client is not a reverse proxy");
        };
        let request = match self.direct(request) {
            Ok(request) => request,
            Err(e) => return internal_error_response(&e.to_string()),
        };
        let uri = request.uri().clone();
        match RequestForwarder::new(http.clone()).forward_to(uri, request).await {
            Ok(response) => into_handler_response(response),
            Err(e) => internal_error_response(&e.to_string()),
        }
    }

    /// Serve an inbound connection's request as a reverse proxy.
    pub async fn serve_http(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        if !self.proxy {
            return internal_error_response("client is not a reverse proxy");
        }
        let (parts, body) = request.into_parts();
        match body.collect().await {
            Ok(collected) => {
                self.proxy(Request::from_parts(parts, collected.to_bytes()))
                    .await
            }
            Err(e) => text_response(StatusCode::BAD_REQUEST, format!("Bad Request: {}\n", e)),
        }
    }

    /// Router handler forwarding to this client's endpoint.
    pub fn into_handler(self) -> HandlerFn {
        Arc::new(move |request: HandlerRequest| {
            let client = self.clone();
            async move { client.proxy(request).await }.boxed()
        })
    }
}

impl hyper::service::Service<Request<Incoming>> for Client {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let client = self.clone();
        Box::pin(async move { Ok(client.serve_http(request).await) })
    }
}

fn target_uri(service: &str, path: &str, query: Option<&str>) -> Result<Uri> {
    let mut uri = format!("http://{}{}", service_fqdn(service), path);
    if let Some(query) = query {
        uri.push('?');
        uri.push_str(query);
    }
    uri.parse::<Uri>()
        .map_err(|e| MeshError::Http(format!("invalid target {}: {}", uri, e)))
}
