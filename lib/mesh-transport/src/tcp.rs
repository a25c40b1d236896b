//! TCP transport
//!
//! Nodes listen on a real socket. A `join` exchanges service directories; a
//! `dial` connects to the node that advertised the host and hands the rest of
//! the connection to its virtual listener.

use crate::frame::{read_frame_within, write_frame, DialReply, Hello, JoinReply};
use crate::listener::{deliver, Bindings, VirtualListener};
use crate::{env_name, MeshStream, ServiceRecord, Transport};
use mesh_core::addr::{is_unspecified_host, join_host_port, split_host_port};
use mesh_core::TransportError;
use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest a peer may take to send or answer the opening frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport handle backed by TCP sockets.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TcpInner>,
}

struct TcpInner {
    env: String,
    bindings: Bindings,
    directory: RwLock<HashMap<String, ServiceRecord>>,
    peers: Mutex<BTreeSet<String>>,
    listen_addr: Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    pub fn new(tags: &[String]) -> Self {
        Self {
            inner: Arc::new(TcpInner {
                env: env_name(tags),
                bindings: Bindings::default(),
                directory: RwLock::new(HashMap::new()),
                peers: Mutex::new(BTreeSet::new()),
                listen_addr: Mutex::new(None),
            }),
        }
    }
}

impl TcpInner {
    async fn connect(&self, addr: &str) -> Result<TcpStream, TransportError> {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                Ok(stream)
            }
            Ok(Err(e)) => {
                debug!(addr, error = %e, "tcp connect failed");
                Err(TransportError::ConnectionRefused(format!("{}: {}", addr, e)))
            }
            Err(_) => Err(TransportError::ConnectionRefused(format!(
                "{}: connect timed out",
                addr
            ))),
        }
    }

    async fn join_peer(&self, addr: &str) -> Result<(), TransportError> {
        let mut stream = BufReader::new(self.connect(addr).await?);
        let hello = Hello::Join {
            env: self.env.clone(),
            addr: self.listen_addr().map(|a| a.to_string()),
            services: self.bindings.hosts(),
        };
        write_frame(&mut stream, &hello).await?;
        let reply: JoinReply = read_frame_within(&mut stream, HANDSHAKE_TIMEOUT).await?;

        let local_hosts = self.bindings.hosts();
        {
            let mut directory = self.directory.write().unwrap_or_else(|e| e.into_inner());
            for record in reply.services {
                if local_hosts.contains(&record.host) {
                    continue;
                }
                let served_by = record.addr.clone().unwrap_or_else(|| addr.to_string());
                directory.insert(
                    record.host.clone(),
                    ServiceRecord {
                        addr: Some(served_by),
                        ..record
                    },
                );
            }
        }
        {
            let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
            peers.insert(addr.to_string());
            peers.extend(reply.peers);
        }
        debug!(addr, env = %reply.env, "joined peer");
        Ok(())
    }

    fn listen_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn peer_list(&self) -> Vec<String> {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        peers.iter().cloned().collect()
    }

    fn records(&self) -> Vec<ServiceRecord> {
        let own_addr = self.listen_addr().map(|a| a.to_string());
        let mut records: Vec<ServiceRecord> = self
            .bindings
            .hosts()
            .into_iter()
            .map(|host| ServiceRecord {
                host,
                env: self.env.clone(),
                addr: own_addr.clone(),
            })
            .collect();
        let directory = self.directory.read().unwrap_or_else(|e| e.into_inner());
        records.extend(directory.values().cloned());
        records
    }

    fn record_joiner(&self, addr: String, env: String, services: Vec<String>) {
        {
            let mut directory = self.directory.write().unwrap_or_else(|e| e.into_inner());
            for host in services {
                directory.insert(
                    host.clone(),
                    ServiceRecord {
                        host,
                        env: env.clone(),
                        addr: Some(addr.clone()),
                    },
                );
            }
        }
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        peers.insert(addr);
    }

    async fn handle_conn(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), TransportError> {
        // buffered bytes past the frame travel with the stream on a dial
        let mut stream = BufReader::new(stream);
        match read_frame_within::<_, Hello>(&mut stream, HANDSHAKE_TIMEOUT).await? {
            Hello::Dial { host, env } => {
                if env != self.env {
                    let reply = DialReply {
                        ok: false,
                        error: Some(format!("environment mismatch: {}", env)),
                    };
                    return write_frame(&mut stream, &reply).await;
                }
                match self.bindings.sender(&host) {
                    Some(sender) => {
                        write_frame(&mut stream, &DialReply { ok: true, error: None }).await?;
                        deliver(&sender, &host, Box::new(stream)).await
                    }
                    None => {
                        let reply = DialReply {
                            ok: false,
                            error: Some(format!("{} is not bound here", host)),
                        };
                        write_frame(&mut stream, &reply).await
                    }
                }
            }
            Hello::Join { env, addr, services } => {
                if let Some(addr) = addr {
                    self.record_joiner(advertised_addr(&addr, peer.ip()), env, services);
                }
                let reply = JoinReply {
                    env: self.env.clone(),
                    services: self.records(),
                    peers: self.peer_list(),
                };
                write_frame(&mut stream, &reply).await
            }
        }
    }
}

/// Replace a wildcard listen host with the address the peer connected from.
fn advertised_addr(addr: &str, peer_ip: IpAddr) -> String {
    match split_host_port(addr) {
        Ok((host, port)) if is_unspecified_host(&host) || host == "::" => {
            join_host_port(&peer_ip.to_string(), &port)
        }
        _ => addr.to_string(),
    }
}

async fn accept_loop(inner: Arc<TcpInner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                stream.set_nodelay(true).ok();
                let inner = inner.clone();
                tokio::spawn(async move {
                    if let Err(e) = inner.handle_conn(stream, peer).await {
                        debug!(%peer, error = %e, "tcp transport connection failed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "error accepting peer connection");
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn env(&self) -> &str {
        &self.inner.env
    }

    async fn dial(&self, host: &str) -> Result<MeshStream, TransportError> {
        if let Some(result) = self.inner.bindings.connect_local(host).await {
            return result;
        }

        let addr = {
            let directory = self.inner.directory.read().unwrap_or_else(|e| e.into_inner());
            directory
                .get(host)
                .filter(|record| record.env == self.inner.env)
                .and_then(|record| record.addr.clone())
        }
        .ok_or_else(|| TransportError::NoRoute(host.to_string()))?;

        let mut stream = BufReader::new(self.inner.connect(&addr).await?);
        let hello = Hello::Dial {
            host: host.to_string(),
            env: self.inner.env.clone(),
        };
        write_frame(&mut stream, &hello).await?;
        let reply: DialReply = read_frame_within(&mut stream, HANDSHAKE_TIMEOUT).await?;
        if !reply.ok {
            return Err(TransportError::ConnectionRefused(format!(
                "{}: {}",
                host,
                reply.error.unwrap_or_default()
            )));
        }
        Ok(Box::new(stream))
    }

    async fn bind(&self, host: &str) -> Result<VirtualListener, TransportError> {
        self.inner.bindings.bind(host)
    }

    async fn listen_and_serve(&self, addr: &str) -> Result<String, TransportError> {
        let (host, port) =
            split_host_port(addr).map_err(|_| TransportError::InvalidAddress(addr.to_string()))?;
        let host = if host.is_empty() { "0.0.0.0".to_string() } else { host };
        let listener = TcpListener::bind(join_host_port(&host, &port)).await?;
        let local = listener.local_addr()?;
        *self.inner.listen_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(local);

        info!(addr = %local, env = %self.inner.env, "tcp transport listening");
        tokio::spawn(accept_loop(self.inner.clone(), listener));
        Ok(local.to_string())
    }

    async fn join(&self, addr: &str) -> Result<(), TransportError> {
        self.inner.join_peer(addr).await
    }

    async fn services(&self) -> Vec<ServiceRecord> {
        for peer in self.inner.peer_list() {
            if let Err(e) = self.inner.join_peer(&peer).await {
                debug!(peer = %peer, error = %e, "directory refresh failed");
            }
        }
        self.inner.records()
    }
}
