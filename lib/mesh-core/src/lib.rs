//! Core types for meshrpc
//!
//! This library provides:
//! - Handler specs and endpoint introspection
//! - Endpoint descriptions with verb allow-lists
//! - Virtual service naming and address helpers
//! - The error taxonomy shared by every mesh crate

pub mod addr;
pub mod endpoint;
pub mod error;
pub mod introspect;
pub mod logging;

pub use addr::{service_fqdn, DEFAULT_PORT, MESH_PREFIX};
pub use endpoint::{EndpointInfo, HandlerFn, HandlerRequest, HandlerResponse};
pub use error::{IntrospectionError, MeshError, Result, TransportError};
pub use introspect::{
    reflect_endpoint_info, reflect_endpoints, HandlerSpec, MethodShape, MethodSignature, Spec,
    SpecDecl, SpecSignature,
};
