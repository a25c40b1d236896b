//! HTTP plumbing for mesh nodes: transport-backed client, forwarder, local
//! router with middleware, accept loops and administrative routes
pub mod client;
pub mod forwarder;
pub mod http;
pub mod loopback;
pub mod middleware;
pub mod router;
pub mod server;

pub use client::{HttpClientConfig, MeshHttpClient};
pub use forwarder::{into_handler_response, RequestForwarder};
pub use loopback::ProxyError;
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareContext};
pub use router::{RouteMatch, Router};
pub use server::{router_handler, serve_tcp, serve_virtual, IncomingHandler};
