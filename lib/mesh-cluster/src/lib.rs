//! Mesh nodes, RPC clients and dependency readiness
//!
//! This library provides:
//! - `MeshNode`: joins peers, serves its handlers under its virtual name
//! - `Client`: calls or reverse-proxies one handler of another service
//! - `wait`: blocks until dependencies answer their liveness probe

pub mod client;
pub mod config;
pub mod node;
pub mod wait;

pub use client::{Client, MethodOverride};
pub use config::{NodeOptions, DEFAULT_TAGS};
pub use node::MeshNode;
pub use wait::{ContextError, ServiceState, WaitContext};
