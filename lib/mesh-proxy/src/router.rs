//! Local HTTP router
//!
//! Routes are keyed by path and then by verb. A pattern ending in `/*` or `/`
//! matches every path below it; exact paths win over patterns.

use crate::http::{internal_error_response, method_not_allowed_response, not_found_response};
use crate::middleware::{MiddlewareChain, MiddlewareContext};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use mesh_core::{HandlerFn, HandlerRequest, HandlerResponse, MeshError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Outcome of looking a request up in the route table.
pub enum RouteMatch {
    Found(HandlerFn),
    /// The path exists under other verbs.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// Append-only route table with a middleware chain around every request.
#[derive(Default)]
pub struct Router {
    routes: RwLock<BTreeMap<String, HashMap<Method, HandlerFn>>>,
    middleware: MiddlewareChain,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_middleware(middleware: MiddlewareChain) -> Self {
        Self {
            routes: RwLock::new(BTreeMap::new()),
            middleware,
        }
    }

    /// Register `handler` for one verb on `path`.
    pub fn route(&self, method: Method, path: &str, handler: HandlerFn) -> Result<()> {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let verbs = routes.entry(path.to_string()).or_default();
        if verbs.contains_key(&method) {
            return Err(MeshError::DuplicateRoute {
                method: method.to_string(),
                path: path.to_string(),
            });
        }
        debug!(%method, path, "route registered");
        verbs.insert(method, handler);
        Ok(())
    }

    /// Register `handler` for every verb in `methods`.
    pub fn route_methods(&self, methods: &[String], path: &str, handler: HandlerFn) -> Result<()> {
        for method in methods {
            let method = Method::from_bytes(method.as_bytes())
                .map_err(|e| MeshError::Http(format!("invalid method {}: {}", method, e)))?;
            self.route(method, path, handler.clone())?;
        }
        Ok(())
    }

    /// Registered (verb, path) pairs, sorted by path.
    pub fn routes(&self) -> Vec<(Method, String)> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        for (path, verbs) in routes.iter() {
            let mut methods: Vec<&Method> = verbs.keys().collect();
            methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            out.extend(methods.into_iter().map(|m| (m.clone(), path.clone())));
        }
        out
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        let verbs = routes.get(path).or_else(|| {
            // longest matching pattern wins
            routes
                .iter()
                .filter(|(pattern, _)| match_path(path, pattern))
                .max_by_key(|(pattern, _)| pattern.len())
                .map(|(_, verbs)| verbs)
        });

        match verbs {
            None => RouteMatch::NotFound,
            Some(verbs) => match verbs.get(method) {
                Some(handler) => RouteMatch::Found(handler.clone()),
                None => {
                    let mut allowed: Vec<Method> = verbs.keys().cloned().collect();
                    allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                    RouteMatch::MethodNotAllowed(allowed)
                }
            },
        }
    }

    /// Dispatch a buffered request.
    pub async fn handle(&self, request: HandlerRequest) -> HandlerResponse {
        let context = MiddlewareContext::from_request(&request);
        if let Err(e) = self.middleware.on_request(&context).await {
            warn!(path = %context.path, error = %e, "request rejected by middleware");
            return internal_error_response(&e.to_string());
        }

        let response = match self.lookup(request.method(), request.uri().path()) {
            RouteMatch::Found(handler) => handler(request).await,
            RouteMatch::MethodNotAllowed(allowed) => method_not_allowed_response(&allowed),
            RouteMatch::NotFound => not_found_response(&context.path),
        };

        if let Err(e) = self
            .middleware
            .on_response(&context, response.status().as_u16())
            .await
        {
            warn!(path = %context.path, error = %e, "response middleware failed");
        }
        response
    }

    /// Collect the body of an inbound request and dispatch it.
    pub async fn serve(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let (parts, body) = request.into_parts();
        match body.collect().await {
            Ok(collected) => {
                self.handle(Request::from_parts(parts, collected.to_bytes()))
                    .await
            }
            Err(e) => {
                debug!(error = %e, "failed to read request body");
                crate::http::text_response(StatusCode::BAD_REQUEST, "Bad Request\n")
            }
        }
    }
}

/// Match a request path against a route pattern
pub fn match_path(path: &str, pattern: &str) -> bool {
    // Exact match
    if pattern == path {
        return true;
    }

    // Prefix match (pattern ends with / or /*)
    if pattern.ends_with('/') && path.starts_with(pattern) {
        return true;
    }

    // Prefix match with wildcard
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return path == prefix || path.starts_with(&format!("{}/", prefix));
    }

    false
}
