//! Handshake frames for the TCP transport
//!
//! Each connection starts with one newline-terminated JSON frame from the
//! dialer and one reply frame. A `dial` connection then carries raw bytes for
//! the bound virtual listener; a `join` connection is closed after the reply.

use crate::ServiceRecord;
use mesh_core::TransportError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Hello {
    Dial {
        host: String,
        env: String,
    },
    Join {
        env: String,
        /// Address the joining node listens on, if any.
        addr: Option<String>,
        services: Vec<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReply {
    pub env: String,
    pub services: Vec<ServiceRecord>,
    pub peers: Vec<String>,
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line =
        serde_json::to_vec(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Bytes after the newline stay buffered in `reader`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, TransportError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::with_capacity(256);
    reader
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    match line.pop() {
        Some(b'\n') => {}
        _ if line.len() >= MAX_FRAME_LEN => {
            return Err(TransportError::Protocol("frame too large".to_string()))
        }
        _ => return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
    }
    serde_json::from_slice(&line).map_err(|e| TransportError::Protocol(e.to_string()))
}

/// `read_frame` bounded by `limit`.
pub async fn read_frame_within<R, T>(reader: &mut R, limit: Duration) -> Result<T, TransportError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    tokio::time::timeout(limit, read_frame(reader))
        .await
        .map_err(|_| TransportError::Protocol("handshake timed out".to_string()))?
}
