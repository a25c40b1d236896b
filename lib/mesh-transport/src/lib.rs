//! Virtual network transports for meshrpc
//!
//! A transport resolves logical hostnames to streams. Nodes bind virtual
//! listeners under their service FQDN, accept real connections from peers
//! on a socket address, and join other nodes to merge service directories.
//!
//! Two implementations are provided:
//! - `MemoryTransport`: in-process fabric, used by tests and single-binary setups
//! - `TcpTransport`: real TCP sockets with a small line-framed handshake

pub mod frame;
pub mod listener;
pub mod memory;
pub mod tcp;

use mesh_core::TransportError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

pub use listener::VirtualListener;
pub use memory::{MemoryFabric, MemoryTransport};
pub use tcp::TcpTransport;

/// Byte stream between two mesh endpoints.
pub trait MeshIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> MeshIo for T {}

pub type MeshStream = Box<dyn MeshIo>;

/// One service visible in a node's directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub host: String,
    pub env: String,
    /// Socket address of the node serving `host`, when known.
    pub addr: Option<String>,
}

/// Primitives a mesh node consumes from the virtual network.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Environment partition this transport belongs to.
    fn env(&self) -> &str;

    /// Open a stream to whichever node has `host` bound.
    async fn dial(&self, host: &str) -> Result<MeshStream, TransportError>;

    /// Start accepting streams dialed to `host`.
    async fn bind(&self, host: &str) -> Result<VirtualListener, TransportError>;

    /// Accept peer connections on a socket address. Returns the bound address.
    async fn listen_and_serve(&self, addr: &str) -> Result<String, TransportError>;

    /// Connect to a peer and merge its service directory.
    async fn join(&self, addr: &str) -> Result<(), TransportError>;

    /// Refresh the directory from known peers and list every visible service.
    async fn services(&self) -> Vec<ServiceRecord>;
}

/// Environment name for a tag list.
pub fn env_name(tags: &[String]) -> String {
    tags.join(".")
}
