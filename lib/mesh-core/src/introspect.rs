//! Handler specs and endpoint introspection
//!
//! A handler spec is any type that declares a table of methods and can
//! dispatch a request to one of them by name. Methods with the `Handler`
//! shape become routable endpoints at `/<TypeName>/<MethodName>`.

use crate::endpoint::{EndpointInfo, HandlerFn, HandlerRequest, HandlerResponse};
use crate::error::IntrospectionError;
use futures::FutureExt;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use http_body_util::Full;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Key in an HTTP methods map that applies to every method of a spec.
pub const ALL_METHODS_KEY: &str = "*";

/// Call shape of a declared method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodShape {
    /// Takes the request context and returns one response.
    Handler,
    /// Anything else; never routed.
    Other,
}

/// One entry of a spec's method table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: String,
    pub shape: MethodShape,
}

impl MethodSignature {
    pub fn handler(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: MethodShape::Handler,
        }
    }

    pub fn other(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: MethodShape::Other,
        }
    }

    pub fn is_handler(&self) -> bool {
        self.shape == MethodShape::Handler
    }
}

/// Capability implemented by every type whose handlers can be published
/// into the mesh.
#[async_trait::async_trait]
pub trait HandlerSpec: Send + Sync + 'static {
    /// Name used as the first path segment of every endpoint.
    fn type_name(&self) -> &str;

    /// Declared method table.
    fn methods(&self) -> Vec<MethodSignature>;

    /// Optional allow-list of HTTP verbs per method name. A `"*"` entry
    /// applies to all methods and takes precedence.
    fn http_methods_map(&self) -> Option<HashMap<String, Vec<String>>> {
        None
    }

    /// Dispatch a request to the named handler.
    async fn call(&self, method: &str, request: HandlerRequest) -> HandlerResponse;
}

/// Fingerprint of a spec captured at introspection time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecSignature {
    type_name: String,
    methods: Arc<[MethodSignature]>,
}

impl SpecSignature {
    pub fn of(spec: &dyn HandlerSpec) -> Self {
        Self {
            type_name: spec.type_name().to_string(),
            methods: spec.methods().into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&MethodSignature> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// What callers hand to publish, wait and client construction: either a
/// real spec or just the logical handler name.
#[derive(Clone)]
pub enum Spec {
    Name(String),
    Handler(Arc<dyn HandlerSpec>),
}

impl Spec {
    pub fn handler<T: HandlerSpec>(spec: T) -> Self {
        Spec::Handler(Arc::new(spec))
    }

    /// Handler type name, or the bare name itself.
    pub fn type_name(&self) -> &str {
        match self {
            Spec::Name(name) => name,
            Spec::Handler(spec) => spec.type_name(),
        }
    }
}

impl fmt::Debug for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spec::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Spec::Handler(spec) => f.debug_tuple("Handler").field(&spec.type_name()).finish(),
        }
    }
}

impl From<&str> for Spec {
    fn from(name: &str) -> Self {
        Spec::Name(name.to_string())
    }
}

impl From<String> for Spec {
    fn from(name: String) -> Self {
        Spec::Name(name)
    }
}

impl<T: HandlerSpec> From<Arc<T>> for Spec {
    fn from(spec: Arc<T>) -> Self {
        Spec::Handler(spec)
    }
}

impl From<SpecDecl> for Spec {
    fn from(decl: SpecDecl) -> Self {
        Spec::handler(decl)
    }
}

/// Declaration-only spec for callers that know a service's method table but
/// don't link its implementation. Calling it answers 501.
#[derive(Clone, Debug, Default)]
pub struct SpecDecl {
    type_name: String,
    methods: Vec<MethodSignature>,
    http_methods: Option<HashMap<String, Vec<String>>>,
}

impl SpecDecl {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn handler(mut self, name: impl Into<String>) -> Self {
        self.methods.push(MethodSignature::handler(name));
        self
    }

    pub fn other(mut self, name: impl Into<String>) -> Self {
        self.methods.push(MethodSignature::other(name));
        self
    }

    pub fn allow(mut self, method: impl Into<String>, verbs: &[&str]) -> Self {
        self.http_methods
            .get_or_insert_with(HashMap::new)
            .insert(method.into(), verbs.iter().map(|v| v.to_string()).collect());
        self
    }
}

#[async_trait::async_trait]
impl HandlerSpec for SpecDecl {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn methods(&self) -> Vec<MethodSignature> {
        self.methods.clone()
    }

    fn http_methods_map(&self) -> Option<HashMap<String, Vec<String>>> {
        self.http_methods.clone()
    }

    async fn call(&self, method: &str, _request: HandlerRequest) -> HandlerResponse {
        let mut response = Response::new(Full::new(Bytes::from(format!(
            "{}.{} is declared but not implemented here\n",
            self.type_name, method
        ))));
        *response.status_mut() = StatusCode::NOT_IMPLEMENTED;
        response
    }
}

/// Extract one endpoint per handler-shaped method of `spec`.
pub fn reflect_endpoints(
    service_name: &str,
    spec: &Spec,
) -> Result<Vec<EndpointInfo>, IntrospectionError> {
    let handler = match spec {
        Spec::Name(name) if name.is_empty() => return Err(IntrospectionError::EmptySpec),
        Spec::Name(name) => return Err(IntrospectionError::Unreflectable(name.clone())),
        Spec::Handler(handler) => handler,
    };
    let type_name = handler.type_name();
    if type_name.is_empty() {
        return Err(IntrospectionError::EmptySpec);
    }

    let signature = SpecSignature::of(handler.as_ref());
    let http_methods = handler.http_methods_map();

    let endpoints: Vec<EndpointInfo> = signature
        .methods()
        .iter()
        .filter(|m| m.is_handler())
        .map(|m| EndpointInfo {
            service: service_name.to_string(),
            path: endpoint_path(type_name, &m.name),
            methods: resolve_methods(http_methods.as_ref(), &m.name),
            spec: Some(signature.clone()),
            handler: Some(bind_handler(handler.clone(), &m.name)),
        })
        .collect();

    if endpoints.is_empty() {
        return Err(IntrospectionError::NoEndpoints(type_name.to_string()));
    }
    Ok(endpoints)
}

/// Describe a single endpoint of `spec` for an outbound client.
///
/// A bare name skips validation; an empty `method_name` describes the spec
/// as a whole.
pub fn reflect_endpoint_info(
    service_name: &str,
    spec: &Spec,
    method_name: &str,
) -> Result<EndpointInfo, IntrospectionError> {
    let handler = match spec {
        Spec::Name(name) if name.is_empty() => return Err(IntrospectionError::EmptySpec),
        Spec::Name(name) => {
            return Ok(EndpointInfo {
                service: service_name.to_string(),
                path: endpoint_path(name, method_name),
                methods: Vec::new(),
                spec: None,
                handler: None,
            })
        }
        Spec::Handler(handler) => handler,
    };
    let type_name = handler.type_name();
    if type_name.is_empty() {
        return Err(IntrospectionError::EmptySpec);
    }

    let signature = SpecSignature::of(handler.as_ref());
    if !method_name.is_empty() {
        match signature.method(method_name) {
            None => {
                return Err(IntrospectionError::MissingMethod {
                    spec: type_name.to_string(),
                    method: method_name.to_string(),
                })
            }
            Some(m) if !m.is_handler() => {
                return Err(IntrospectionError::NotAHandler {
                    spec: type_name.to_string(),
                    method: method_name.to_string(),
                })
            }
            Some(_) => {}
        }
    }

    Ok(EndpointInfo {
        service: service_name.to_string(),
        path: endpoint_path(type_name, method_name),
        methods: resolve_methods(handler.http_methods_map().as_ref(), method_name),
        spec: Some(signature),
        handler: None,
    })
}

fn endpoint_path(type_name: &str, method_name: &str) -> String {
    format!("/{}/{}", type_name, method_name)
}

fn resolve_methods(map: Option<&HashMap<String, Vec<String>>>, method_name: &str) -> Vec<String> {
    let Some(map) = map else {
        return Vec::new();
    };
    map.get(ALL_METHODS_KEY)
        .or_else(|| map.get(method_name))
        .cloned()
        .unwrap_or_default()
}

fn bind_handler(spec: Arc<dyn HandlerSpec>, method_name: &str) -> HandlerFn {
    let method_name: Arc<str> = Arc::from(method_name);
    Arc::new(move |request: HandlerRequest| {
        let spec = spec.clone();
        let method_name = method_name.clone();
        async move { spec.call(&method_name, request).await }.boxed()
    })
}
