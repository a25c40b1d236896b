//! Greeter: a small service published into the mesh
//!
//! - `service`: the domain logic and the `Greeter` trait
//! - `rpc`: JSON handler spec exposing the service over the mesh
//! - `handler`: a plain HTTP handler spec published next to it
//! - `client`: `Greeter` implementation that calls a remote instance

pub mod client;
pub mod handler;
pub mod rpc;
pub mod service;

pub use client::GreeterClient;
pub use handler::Handler;
pub use rpc::RpcHandler;
pub use service::{Greeter, GreeterError, Postcard, Service};

/// Name the greeter publishes itself under.
pub const SERVICE_NAME: &str = "greeter";
