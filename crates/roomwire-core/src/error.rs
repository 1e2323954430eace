//! Error types for roomwire-core

use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error a middleware hands to its continuation to abort admission.
///
/// Only [`message`](MiddlewareError::message) reaches the rejected client.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct MiddlewareError {
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl MiddlewareError {
    /// Create an error carrying only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// The message delivered to the client
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for MiddlewareError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for MiddlewareError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Endpoint already bridged: {0}")]
    AlreadyBridged(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    #[error("Namespace dropped for socket: {0}")]
    NamespaceDropped(String),
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Admission rejected: {0}")]
    Middleware(#[from] MiddlewareError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),
}
