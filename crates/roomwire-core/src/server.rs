//! Server main structure
//!
//! Owns the default namespace and re-emits its connection events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::emitter::{EventEmitter, ListenerId};
use crate::middleware::{Middleware, Next};
use crate::namespace::{Namespace, CONNECTION_EVENT};
use crate::operators::BroadcastOperator;
use crate::registry::Registry;
use crate::socket::{ClientSocket, ServerSocket};

/// Message a capacity-limited server rejects new clients with
pub const CAPACITY_MESSAGE: &str = "Server at capacity";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name of the default namespace
    pub namespace: String,
    /// Maximum number of admitted sockets; unlimited when unset
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            namespace: "/".to_string(),
            max_connections: None,
        }
    }
}

pub(crate) struct ServerInner {
    config: ServerConfig,
    namespace: Namespace,
    events: EventEmitter<ServerSocket>,
}

/// The top-level server
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("namespace", &self.inner.namespace)
            .finish()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Create a new server with the default namespace `/`
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new server from configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ServerInner>| ServerInner {
            namespace: Namespace::attached(config.namespace.clone(), weak.clone()),
            events: EventEmitter::new(),
            config,
        });

        let events = inner.events.clone();
        inner.namespace.on_connection(move |socket| {
            events.emit(CONNECTION_EVENT, socket);
        });

        if let Some(max) = inner.config.max_connections {
            inner
                .namespace
                .use_middleware_front(capacity(inner.namespace.connected().clone(), max));
        }

        info!(
            "Server created with namespace {} (max connections: {:?})",
            inner.config.namespace, inner.config.max_connections
        );
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ServerInner>) -> Self {
        Self { inner }
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get the default namespace
    pub fn sockets(&self) -> &Namespace {
        &self.inner.namespace
    }

    /// Listen for sockets admitted to the default namespace
    pub fn on_connection<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ServerSocket) + Send + Sync + 'static,
    {
        self.inner.events.on(CONNECTION_EVENT, listener)
    }

    /// Remove a connection listener
    pub fn off_connection(&self, id: ListenerId) -> bool {
        self.inner.events.off(CONNECTION_EVENT, id)
    }

    /// Create a client socket and start admitting it to the default namespace.
    ///
    /// The outcome arrives as a connection event or as an error on the
    /// returned client.
    pub fn create_socket(&self) -> ClientSocket {
        let client = ClientSocket::new();
        self.inner.namespace.add(&client);
        client
    }

    /// Append a middleware to the default namespace
    pub fn use_middleware<M: Middleware>(&self, middleware: M) -> &Self {
        self.inner.namespace.use_middleware(middleware);
        self
    }

    /// Broadcast to a room of the default namespace
    pub fn to(&self, room: &str) -> BroadcastOperator {
        self.inner.namespace.to(room)
    }
}

fn capacity(
    connected: Registry,
    max: usize,
) -> impl Fn(&ServerSocket, Next) + Send + Sync + 'static {
    move |socket: &ServerSocket, next: Next| {
        if connected.len() >= max {
            debug!(
                "Rejecting socket {}: {} of {} slots taken",
                socket.id(),
                connected.len(),
                max
            );
            next.reject(CAPACITY_MESSAGE);
        } else {
            next.proceed();
        }
    }
}
