//! Endpoint descriptions shared by nodes and clients
use crate::introspect::SpecSignature;
use futures::future::BoxFuture;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response};
use std::fmt;
use std::sync::Arc;

pub type HandlerRequest = Request<Bytes>;
pub type HandlerResponse = Response<Full<Bytes>>;
pub type HandlerFn = Arc<dyn Fn(HandlerRequest) -> BoxFuture<'static, HandlerResponse> + Send + Sync>;

/// Verbs registered for an endpoint without an allow-list.
pub const STANDARD_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "HEAD", "OPTIONS", "DELETE", "CONNECT", "TRACE",
];

/// One routable (path, allowed verbs, handler) triple of a service.
#[derive(Clone)]
pub struct EndpointInfo {
    pub service: String,
    pub path: String,
    /// Allowed verbs; empty means any.
    pub methods: Vec<String>,
    /// Method table of the spec this endpoint came from, if any.
    pub spec: Option<SpecSignature>,
    pub handler: Option<HandlerFn>,
}

impl EndpointInfo {
    pub fn method_allowed(&self, method: &str) -> bool {
        if self.methods.is_empty() {
            return true; // no constraints
        }
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Whether `name` is a handler-shaped method of the captured spec.
    pub fn is_valid_handler(&self, name: &str) -> bool {
        match &self.spec {
            None => true,
            Some(spec) => spec.method(name).map(|m| m.is_handler()).unwrap_or(false),
        }
    }

    /// Copy of this endpoint pointing at another method of the same spec.
    pub fn with_method_name(&self, name: &str) -> EndpointInfo {
        EndpointInfo {
            path: rewrite_path(name, &self.path),
            ..self.clone()
        }
    }

    /// Verbs to register a route under.
    pub fn route_methods(&self) -> Vec<String> {
        if self.methods.is_empty() {
            STANDARD_METHODS.iter().map(|m| m.to_string()).collect()
        } else {
            self.methods.iter().map(|m| m.to_ascii_uppercase()).collect()
        }
    }
}

impl fmt::Debug for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointInfo")
            .field("service", &self.service)
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("spec", &self.spec.as_ref().map(|s| s.type_name()))
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Replace the last segment of `path` with `name`. Names containing a slash
/// are ignored.
pub fn rewrite_path(name: &str, path: &str) -> String {
    if name.is_empty() || name.contains('/') {
        return path.to_string();
    }
    match path.rfind('/') {
        Some(idx) => format!("{}{}", &path[..=idx], name),
        None => name.to_string(),
    }
}
