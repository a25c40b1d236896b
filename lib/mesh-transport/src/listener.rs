//! Virtual listeners and the per-node table of bound hostnames

use crate::MeshStream;
use mesh_core::TransportError;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

const ACCEPT_BACKLOG: usize = 128;

/// Size of the in-process pipe used when a node dials one of its own hosts.
pub(crate) const LOCAL_PIPE_SIZE: usize = 64 * 1024;

/// Accepts streams dialed to one virtual hostname.
pub struct VirtualListener {
    host: String,
    incoming: mpsc::Receiver<MeshStream>,
}

impl VirtualListener {
    /// Wait for the next inbound stream. `None` once the transport is gone.
    pub async fn accept(&mut self) -> Option<MeshStream> {
        self.incoming.recv().await
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

/// Hostnames bound on one node.
#[derive(Default)]
pub(crate) struct Bindings {
    hosts: Mutex<HashMap<String, mpsc::Sender<MeshStream>>>,
}

impl Bindings {
    pub(crate) fn bind(&self, host: &str) -> Result<VirtualListener, TransportError> {
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = hosts.get(host) {
            if !existing.is_closed() {
                return Err(TransportError::AlreadyBound(host.to_string()));
            }
        }
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        hosts.insert(host.to_string(), tx);
        debug!(host, "bound virtual listener");
        Ok(VirtualListener {
            host: host.to_string(),
            incoming: rx,
        })
    }

    pub(crate) fn sender(&self, host: &str) -> Option<mpsc::Sender<MeshStream>> {
        let hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts.get(host).filter(|tx| !tx.is_closed()).cloned()
    }

    pub(crate) fn hosts(&self) -> Vec<String> {
        let hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Open an in-process stream to a locally bound host.
    pub(crate) async fn connect_local(&self, host: &str) -> Option<Result<MeshStream, TransportError>> {
        let sender = self.sender(host)?;
        let (client, server) = tokio::io::duplex(LOCAL_PIPE_SIZE);
        Some(deliver(&sender, host, Box::new(server)).await.map(|_| Box::new(client) as MeshStream))
    }
}

/// Hand an accepted stream to the listener behind `sender`.
pub(crate) async fn deliver(
    sender: &mpsc::Sender<MeshStream>,
    host: &str,
    stream: MeshStream,
) -> Result<(), TransportError> {
    sender
        .send(stream)
        .await
        .map_err(|_| TransportError::ConnectionRefused(host.to_string()))
}
