use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Postcard {
    #[serde(default)]
    pub picture_url: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Error, Debug)]
pub enum GreeterError {
    #[error("no postcard")]
    NoPostcard,

    #[error("no recipient")]
    NoRecipient,

    /// Error reported by a remote greeter.
    #[error("{0}")]
    Remote(String),

    #[error("greeter is not reachable")]
    Unavailable,

    #[error(transparent)]
    Mesh(#[from] mesh_core::MeshError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Operations of the greeter, local or remote.
#[async_trait::async_trait]
pub trait Greeter: Send + Sync {
    async fn greet(&self, name: &str) -> Result<String, GreeterError>;

    async fn send_postcard(&self, card: Option<&Postcard>) -> Result<(), GreeterError>;
}

#[derive(Clone, Debug, Default)]
pub struct Service;

impl Service {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Greeter for Service {
    async fn greet(&self, name: &str) -> Result<String, GreeterError> {
        Ok(format!("Hello, {}", name))
    }

    async fn send_postcard(&self, card: Option<&Postcard>) -> Result<(), GreeterError> {
        let card = card.ok_or(GreeterError::NoPostcard)?;
        if card.recipient.is_empty() {
            return Err(GreeterError::NoRecipient);
        }
        info!(
            recipient = %card.recipient,
            address = %card.address,
            message = %card.message,
            "sending postcard"
        );
        Ok(())
    }
}
