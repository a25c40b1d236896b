//! In-process transport
//!
//! Every `MemoryTransport` created from the same `MemoryFabric` can listen on
//! fake socket addresses, join each other and dial hosts bound on any node
//! reachable through the peer graph.

use crate::listener::{Bindings, VirtualListener};
use crate::{env_name, MeshStream, ServiceRecord, Transport};
use mesh_core::addr::{join_host_port, split_host_port};
use mesh_core::TransportError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;
use uuid::Uuid;

const FIRST_EPHEMERAL_PORT: u16 = 40000;

/// Shared "network" that memory transports listen and join on.
#[derive(Clone, Default)]
pub struct MemoryFabric {
    state: Arc<Mutex<FabricState>>,
}

#[derive(Default)]
struct FabricState {
    sockets: HashMap<String, Weak<MemoryNode>>,
    next_port: u16,
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport attached to this fabric.
    pub fn transport(&self, tags: &[String]) -> MemoryTransport {
        MemoryTransport::new(self, tags)
    }

    fn lookup(&self, key: &str) -> Option<Arc<MemoryNode>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sockets.get(key).and_then(Weak::upgrade)
    }

    fn listen(&self, host: &str, port: u16, node: &Arc<MemoryNode>) -> Result<u16, TransportError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let port = if port == 0 {
            state.allocate_port(host)
        } else {
            port
        };
        let key = socket_key(host, port);
        if state.sockets.get(&key).and_then(Weak::upgrade).is_some() {
            return Err(TransportError::AddrInUse(key));
        }
        state.sockets.insert(key, Arc::downgrade(node));
        Ok(port)
    }
}

impl FabricState {
    fn allocate_port(&mut self, host: &str) -> u16 {
        loop {
            if self.next_port < FIRST_EPHEMERAL_PORT {
                self.next_port = FIRST_EPHEMERAL_PORT;
            }
            let port = self.next_port;
            self.next_port = self.next_port.wrapping_add(1);
            let taken = self
                .sockets
                .get(&socket_key(host, port))
                .and_then(Weak::upgrade)
                .is_some();
            if !taken {
                return port;
            }
        }
    }
}

struct MemoryNode {
    id: Uuid,
    env: String,
    bindings: Bindings,
    peers: Mutex<HashMap<Uuid, Weak<MemoryNode>>>,
    listen_addr: Mutex<Option<String>>,
}

impl MemoryNode {
    fn add_peer(&self, peer: &Arc<MemoryNode>) {
        if peer.id == self.id {
            return;
        }
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        peers.insert(peer.id, Arc::downgrade(peer));
    }

    fn peers(&self) -> Vec<Arc<MemoryNode>> {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        peers.values().filter_map(Weak::upgrade).collect()
    }

    fn listen_addr(&self) -> Option<String> {
        self.listen_addr
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Transport handle of one node on a `MemoryFabric`.
pub struct MemoryTransport {
    fabric: MemoryFabric,
    node: Arc<MemoryNode>,
}

impl MemoryTransport {
    pub fn new(fabric: &MemoryFabric, tags: &[String]) -> Self {
        Self {
            fabric: fabric.clone(),
            node: Arc::new(MemoryNode {
                id: Uuid::new_v4(),
                env: env_name(tags),
                bindings: Bindings::default(),
                peers: Mutex::new(HashMap::new()),
                listen_addr: Mutex::new(None),
            }),
        }
    }

    /// Nodes reachable from this one, itself first.
    fn reachable(&self) -> Vec<Arc<MemoryNode>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.node.clone()]);
        let mut nodes = Vec::new();
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node.id) {
                continue;
            }
            queue.extend(node.peers());
            nodes.push(node);
        }
        nodes
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn env(&self) -> &str {
        &self.node.env
    }

    async fn dial(&self, host: &str) -> Result<MeshStream, TransportError> {
        for node in self.reachable() {
            if node.env != self.node.env {
                continue;
            }
            if let Some(result) = node.bindings.connect_local(host).await {
                return result;
            }
        }
        Err(TransportError::NoRoute(host.to_string()))
    }

    async fn bind(&self, host: &str) -> Result<VirtualListener, TransportError> {
        self.node.bindings.bind(host)
    }

    async fn listen_and_serve(&self, addr: &str) -> Result<String, TransportError> {
        let (host, port) = parse_addr(addr)?;
        let port = self.fabric.listen(&normalize_host(&host), port, &self.node)?;
        let bound = join_host_port(&host, &port.to_string());
        *self.node.listen_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(bound.clone());
        debug!(addr = %bound, "memory transport listening");
        Ok(bound)
    }

    async fn join(&self, addr: &str) -> Result<(), TransportError> {
        let (host, port) = parse_addr(addr)?;
        let peer = self
            .fabric
            .lookup(&socket_key(&normalize_host(&host), port))
            .ok_or_else(|| TransportError::ConnectionRefused(addr.to_string()))?;
        self.node.add_peer(&peer);
        peer.add_peer(&self.node);
        debug!(addr, "memory transport joined peer");
        Ok(())
    }

    async fn services(&self) -> Vec<ServiceRecord> {
        self.reachable()
            .into_iter()
            .flat_map(|node| {
                let addr = node.listen_addr();
                let env = node.env.clone();
                node.bindings
                    .hosts()
                    .into_iter()
                    .map(move |host| ServiceRecord {
                        host,
                        env: env.clone(),
                        addr: addr.clone(),
                    })
            })
            .collect()
    }
}

fn parse_addr(addr: &str) -> Result<(String, u16), TransportError> {
    let (host, port) =
        split_host_port(addr).map_err(|_| TransportError::InvalidAddress(addr.to_string()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| TransportError::InvalidAddress(addr.to_string()))?;
    Ok((host, port))
}

/// Local and wildcard hosts all name the same fake interface.
fn normalize_host(host: &str) -> String {
    match host {
        "" | "0.0.0.0" | "127.0.0.1" | "::" | "::1" | "localhost" => "localhost".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

fn socket_key(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn tags(t: &[&str]) -> Vec<String> {
        t.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_dial_across_joined_nodes() {
        let fabric = MemoryFabric::new();
        let a = fabric.transport(&tags(&["test"]));
        let b = fabric.transport(&tags(&["test"]));

        let mut listener = b.bind("meshrpc.b").await.unwrap();
        b.listen_and_serve("0.0.0.0:9100").await.unwrap();
        assert!(a.dial("meshrpc.b").await.is_err());

        a.join("localhost:9100").await.unwrap();
        let mut stream = a.dial("meshrpc.b").await.unwrap();
        stream.write_all(b"hi").await.unwrap();

        let mut accepted = listener.accept().await.unwrap();
        let mut buf = [0u8; 2];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_join_unknown_address_refused() {
        let fabric = MemoryFabric::new();
        let a = fabric.transport(&tags(&["test"]));
        assert!(matches!(
            a.join("nowhere:11999").await,
            Err(TransportError::ConnectionRefused(_))
        ));
        assert!(matches!(
            a.join("bad:addr:1:11999").await,
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_addr_in_use() {
        let fabric = MemoryFabric::new();
        let a = fabric.transport(&tags(&["test"]));
        let b = fabric.transport(&tags(&["test"]));
        a.listen_and_serve("127.0.0.1:9200").await.unwrap();
        assert!(matches!(
            b.listen_and_serve("0.0.0.0:9200").await,
            Err(TransportError::AddrInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_ephemeral_port() {
        let fabric = MemoryFabric::new();
        let a = fabric.transport(&tags(&["test"]));
        let bound = a.listen_and_serve("0.0.0.0:0").await.unwrap();
        let (host, port) = split_host_port(&bound).unwrap();
        assert_eq!(host, "0.0.0.0");
        assert_ne!(port, "0");

        let b = fabric.transport(&tags(&["test"]));
        b.join(&format!("localhost:{}", port)).await.unwrap();
    }

    #[tokio::test]
    async fn test_env_partition_hides_services() {
        let fabric = MemoryFabric::new();
        let prod = fabric.transport(&tags(&["prod"]));
        let dev = fabric.transport(&tags(&["dev"]));
        let _listener = prod.bind("meshrpc.db").await.unwrap();
        prod.listen_and_serve("prod-host:11999").await.unwrap();

        dev.join("prod-host:11999").await.unwrap();
        assert!(matches!(
            dev.dial("meshrpc.db").await,
            Err(TransportError::NoRoute(_))
        ));
    }

    #[tokio::test]
    async fn test_services_lists_peer_bindings() {
        let fabric = MemoryFabric::new();
        let a = fabric.transport(&tags(&["test"]));
        let b = fabric.transport(&tags(&["test"]));
        let _la = a.bind("meshrpc.a").await.unwrap();
        let _lb = b.bind("meshrpc.b").await.unwrap();
        b.listen_and_serve("node-b:11999").await.unwrap();
        a.join("node-b:11999").await.unwrap();

        let mut hosts: Vec<String> = a.services().await.into_iter().map(|s| s.host).collect();
        hosts.sort();
        assert_eq!(hosts, vec!["meshrpc.a".to_string(), "meshrpc.b".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_transport_refuses_join() {
        let fabric = MemoryFabric::new();
        let a = fabric.transport(&tags(&["test"]));
        a.listen_and_serve("gone:11999").await.unwrap();
        drop(a);

        let b = fabric.transport(&tags(&["test"]));
        assert!(b.join("gone:11999").await.is_err());
    }
}
