//! Mesh node
//!
//! A node owns one transport handle and one local router. It serves the
//! router under its own virtual hostname, joins peers, publishes handler
//! specs as routes and mints clients for other services.

use crate::client::Client;
use crate::config::NodeOptions;
use crate::wait::{wait_for, WaitContext};
use futures::FutureExt;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, StatusCode, Uri};
use mesh_core::addr::{is_unspecified_host, join_host_port, split_host_port, with_default_port};
use mesh_core::{
    reflect_endpoint_info, reflect_endpoints, service_fqdn, EndpointInfo, MeshError, Result, Spec,
    DEFAULT_PORT,
};
use mesh_proxy::http::text_response;
use mesh_proxy::{
    into_handler_response, loopback, router_handler, serve_tcp, serve_virtual, IncomingHandler,
    LoggingMiddleware, MeshHttpClient, MiddlewareChain, RequestForwarder, Router,
};
use mesh_transport::{MemoryFabric, TcpTransport, Transport};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub struct MeshNode {
    service_name: String,
    fqdn: String,
    tags: Vec<String>,
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    http: Arc<MeshHttpClient>,
}

impl MeshNode {
    /// Create a node named `service_name` on `transport`.
    ///
    /// Bootstrap peers in `options.nodes` are joined in the background when
    /// called inside a tokio runtime.
    pub fn new(service_name: &str, options: NodeOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        if service_name.is_empty() {
            return Err(MeshError::config(service_name, "service name is empty"));
        }

        let middleware =
            MiddlewareChain::new().add(LoggingMiddleware::new(service_name, options.debug));
        let router = Arc::new(Router::with_middleware(middleware));
        loopback::install(&router)?;

        let http = Arc::new(MeshHttpClient::new(transport.clone(), options.http.clone()));

        if !options.nodes.is_empty() {
            match Handle::try_current() {
                Ok(handle) => {
                    let transport = transport.clone();
                    let nodes = options.nodes.clone();
                    handle.spawn(async move {
                        if let Err(e) = join_nodes(transport.as_ref(), &nodes).await {
                            warn!(error = %e, "bootstrap join failed");
                        }
                    });
                }
                Err(_) => warn!(nodes = ?options.nodes, "no runtime, bootstrap nodes not joined"),
            }
        }

        info!(service = service_name, tags = ?options.tags, "mesh node created");
        Ok(Self {
            service_name: service_name.to_string(),
            fqdn: service_fqdn(service_name),
            tags: options.tags,
            transport,
            router,
            http,
        })
    }

    /// Node on a fresh TCP transport partitioned by `options.tags`.
    pub fn with_tcp(service_name: &str, options: NodeOptions) -> Result<Self> {
        let transport = Arc::new(TcpTransport::new(&options.tags));
        Self::new(service_name, options, transport)
    }

    /// Node on an in-process fabric.
    pub fn in_memory(service_name: &str, options: NodeOptions, fabric: &MemoryFabric) -> Result<Self> {
        let transport = Arc::new(fabric.transport(&options.tags));
        Self::new(service_name, options, transport)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Virtual hostname the node serves its router under.
    pub fn fqdn(&self) -> &str {
        &self.fqdn
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn http_client(&self) -> &Arc<MeshHttpClient> {
        &self.http
    }

    /// Join every address in `nodes`. Addresses without a port get the
    /// default one. Every peer is attempted; failures are reported together.
    pub async fn join<S: AsRef<str>>(&self, nodes: &[S]) -> Result<()> {
        join_nodes(self.transport.as_ref(), nodes).await
    }

    /// Serve the router under the node's hostname and accept peers on
    /// `addr`. Returns the address actually bound.
    pub async fn listen_and_serve(&self, addr: &str) -> Result<String> {
        let (host, _) = split_host_port(addr)?;

        let listener = self
            .transport
            .bind(&self.fqdn)
            .await
            .map_err(|source| MeshError::Bind {
                host: self.fqdn.clone(),
                source,
            })?;

        // dropping the unspawned listener on failure releases the hostname
        let bound = self
            .transport
            .listen_and_serve(addr)
            .await
            .map_err(|source| MeshError::Listen {
                addr: addr.to_string(),
                source,
            })?;
        tokio::spawn(serve_virtual(listener, router_handler(self.router.clone())));

        if is_unspecified_host(&host) {
            let (_, port) = split_host_port(&bound)?;
            let local = join_host_port("localhost", &port);
            if let Err(e) = self.transport.join(&local).await {
                warn!(addr = %local, error = %e, "self join failed");
            }
        }

        let services = self.transport.services().await;
        info!(
            service = %self.service_name,
            addr = %bound,
            known_services = services.len(),
            "mesh node listening"
        );
        Ok(bound)
    }

    /// Plain HTTP reverse proxy from a real socket to this node's own
    /// routes. Returns the bound socket address; serving continues in the
    /// background.
    pub async fn listen_and_serve_http(&self, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;

        let forwarder = RequestForwarder::new(self.http.clone());
        let fqdn = self.fqdn.clone();
        let handler: IncomingHandler = Arc::new(move |request: Request<Incoming>| {
            let forwarder = forwarder.clone();
            let fqdn = fqdn.clone();
            async move { forward_to_self(&forwarder, &fqdn, request).await }.boxed()
        });
        tokio::spawn(async move {
            if let Err(e) = serve_tcp(listener, handler).await {
                warn!(error = %e, "debug proxy stopped");
            }
        });

        info!(addr = %local, target = %self.fqdn, "debug proxy listening");
        Ok(local)
    }

    /// Register a route for every handler of `spec`.
    pub fn publish(&self, spec: impl Into<Spec>) -> Result<Vec<EndpointInfo>> {
        let spec = spec.into();
        let endpoints = reflect_endpoints(&self.service_name, &spec)?;
        for endpoint in &endpoints {
            let handler = endpoint
                .handler
                .clone()
                .ok_or_else(|| MeshError::InvalidHandler(endpoint.path.clone()))?;
            self.router
                .route_methods(&endpoint.route_methods(), &endpoint.path, handler)?;
            info!(
                service = %self.service_name,
                path = %endpoint.path,
                methods = ?endpoint.methods,
                "published endpoint"
            );
        }
        Ok(endpoints)
    }

    /// Client for `method` of `spec` on `service`.
    ///
    /// # Panics
    ///
    /// If `spec` cannot be introspected or has no such handler. Use
    /// `try_new_client` to get the error instead.
    pub fn new_client(&self, service: &str, spec: impl Into<Spec>, method: &str) -> Client {
        match self.try_new_client(service, spec, method) {
            Ok(client) => client,
            Err(e) => panic!("failed to build client for {}: {}", service, e),
        }
    }

    pub fn try_new_client(&self, service: &str, spec: impl Into<Spec>, method: &str) -> Result<Client> {
        let endpoint = reflect_endpoint_info(service, &spec.into(), method)?;
        debug!(service, path = %endpoint.path, "client created");
        Ok(Client::new(endpoint, self.http.clone(), self.fqdn.clone(), method))
    }

    /// Block until every service in `services` answers its liveness probe.
    pub async fn wait(&self, ctx: &WaitContext, services: HashMap<String, Spec>) -> Result<()> {
        wait_for(self.http.clone(), ctx, services.into_keys()).await
    }
}

async fn join_nodes<S: AsRef<str>>(transport: &dyn Transport, nodes: &[S]) -> Result<()> {
    let mut failed = Vec::new();
    for node in nodes {
        let node = node.as_ref();
        let addr = with_default_port(node, DEFAULT_PORT);
        match transport.join(&addr).await {
            Ok(()) => info!(addr = %addr, "joined node"),
            Err(e) => {
                warn!(addr = %addr, error = %e, "failed to join node");
                failed.push(node.to_string());
            }
        }
    }
    if !failed.is_empty() {
        return Err(MeshError::Join(failed));
    }

    let services = transport.services().await;
    debug!(known_services = services.len(), "directory refreshed");
    Ok(())
}

async fn forward_to_self(
    forwarder: &RequestForwarder,
    fqdn: &str,
    request: Request<Incoming>,
) -> mesh_core::HandlerResponse {
    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return text_response(StatusCode::BAD_REQUEST, format!("Bad Request: {}\n", e)),
    };
    let path = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let target = match format!("http://{}{}", fqdn, path).parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, format!("Bad Request: {}\n", e)),
    };
    match forwarder
        .forward_to(target, Request::from_parts(parts, body))
        .await
    {
        Ok(response) => into_handler_response(response),
        Err(e) => mesh_proxy::http::internal_error_response(&e.to_string()),
    }
}
