use thiserror::Error;

pub type Result<T> = std::result::Result<T, MeshError>;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("invalid address {addr}: {reason}")]
    Config { addr: String, reason: String },

    #[error("failed to inspect handler spec: {0}")]
    Introspection(#[from] IntrospectionError),

    #[error("failed to join nodes: {}", .0.join(", "))]
    Join(Vec<String>),

    #[error("failed to bind {host}: {source}")]
    Bind {
        host: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: TransportError,
    },

    #[error("method {method} not allowed for {path}: must be {}", .allowed.join(","))]
    MethodNotAllowed {
        method: String,
        path: String,
        allowed: Vec<String>,
    },

    #[error("handler already registered for {method} {path}")]
    DuplicateRoute { method: String, path: String },

    #[error("{0} is not a valid handler or doesn't exist")]
    InvalidHandler(String),

    #[error("services failed to respond in time: {}", .0.join(","))]
    WaitTimeout(Vec<String>),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MeshError {
    pub fn config(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            addr: addr.into(),
            reason: reason.into(),
        }
    }
}

impl From<hyper::Error> for MeshError {
    fn from(err: hyper::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<http::Error> for MeshError {
    fn from(err: http::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Reasons a handler spec cannot be turned into endpoints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntrospectionError {
    #[error("spec is empty")]
    EmptySpec,

    #[error("{0} is a bare service name and has no methods to inspect")]
    Unreflectable(String),

    #[error("{0} doesn't have any public handler")]
    NoEndpoints(String),

    #[error("{spec} doesn't have method {method}")]
    MissingMethod { spec: String, method: String },

    #[error("method {method} of {spec} is not a handler")]
    NotAHandler { spec: String, method: String },
}

/// Failures reported by a virtual network transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no route to {0}")]
    NoRoute(String),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("address already in use: {0}")]
    AddrInUse(String),

    #[error("host already bound: {0}")]
    AlreadyBound(String),

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
