//! Namespace orchestrator
//!
//! A namespace owns the admission pipeline, the connected-peer registry and
//! the room adapter. [`Namespace::add`] always hands back a server socket
//! right away; the admission outcome arrives later, either as a
//! [`CONNECTION_EVENT`] on the namespace or as an [`ERROR_EVENT`] on the
//! client.

use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::adapter::{Adapter, InMemoryAdapter};
use crate::bridge::bridge;
use crate::emitter::{EventEmitter, ListenerId};
use crate::error::MiddlewareError;
use crate::middleware::{Admission, Middleware, Pipeline};
use crate::operators::BroadcastOperator;
use crate::registry::Registry;
use crate::server::{Server, ServerInner};
use crate::socket::{Endpoint, ServerSocket, Wire};

/// Fired on the namespace with each admitted server socket
pub const CONNECTION_EVENT: &str = "connection";

/// Fired on a rejected client with the rejection message as sole argument
pub const ERROR_EVENT: &str = "error";

pub(crate) struct NamespaceInner {
    name: String,
    server: Weak<ServerInner>,
    adapter: Arc<dyn Adapter>,
    pipeline: Pipeline,
    connected: Registry,
    events: EventEmitter<ServerSocket>,
}

/// A named admission and broadcast domain.
///
/// Cloning yields another handle to the same namespace.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<NamespaceInner>,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.inner.name)
            .field("connected", &self.inner.connected.len())
            .field("middleware", &self.inner.pipeline.len())
            .finish()
    }
}

/// Client side of a pending admission, detached from its concrete type
struct PendingClient {
    id: String,
    wire: Wire,
}

impl Endpoint for PendingClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn wire(&self) -> &Wire {
        &self.wire
    }
}

impl Namespace {
    /// Create a standalone namespace with an in-memory adapter
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_adapter(name, InMemoryAdapter::new)
    }

    /// Create a standalone namespace with a custom adapter.
    ///
    /// `make_adapter` receives the namespace's peer registry so the adapter can
    /// resolve socket IDs at broadcast time.
    pub fn with_adapter<A, F>(name: impl Into<String>, make_adapter: F) -> Self
    where
        A: Adapter + 'static,
        F: FnOnce(Registry) -> A,
    {
        Self::build(name.into(), Weak::new(), make_adapter)
    }

    pub(crate) fn attached(name: impl Into<String>, server: Weak<ServerInner>) -> Self {
        Self::build(name.into(), server, InMemoryAdapter::new)
    }

    fn build<A, F>(name: String, server: Weak<ServerInner>, make_adapter: F) -> Self
    where
        A: Adapter + 'static,
        F: FnOnce(Registry) -> A,
    {
        let connected = Registry::new();
        let adapter: Arc<dyn Adapter> = Arc::new(make_adapter(connected.clone()));
        debug!("Created namespace {}", name);
        Self {
            inner: Arc::new(NamespaceInner {
                name,
                server,
                adapter,
                pipeline: Pipeline::new(),
                connected,
                events: EventEmitter::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<NamespaceInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<NamespaceInner> {
        Arc::downgrade(&self.inner)
    }

    /// Get namespace name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The owning server, if this namespace belongs to one that is still alive
    pub fn server(&self) -> Option<Server> {
        self.inner.server.upgrade().map(Server::from_inner)
    }

    /// Get the room adapter
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.inner.adapter
    }

    /// Registry of admitted peers
    pub fn connected(&self) -> &Registry {
        &self.inner.connected
    }

    /// Check if a socket is registered
    pub fn is_connected(&self, id: &str) -> bool {
        self.inner.connected.contains(id)
    }

    /// Get the number of registered middleware
    pub fn middleware_count(&self) -> usize {
        self.inner.pipeline.len()
    }

    /// Append an admission middleware
    pub fn use_middleware<M: Middleware>(&self, middleware: M) -> &Self {
        self.inner.pipeline.push(middleware);
        self
    }

    pub(crate) fn use_middleware_front<M: Middleware>(&self, middleware: M) {
        self.inner.pipeline.push_front(middleware);
    }

    /// Run the pipeline against `socket` and report the outcome to `done`
    pub fn run<F>(&self, socket: &ServerSocket, done: F)
    where
        F: FnOnce(Admission) + Send + 'static,
    {
        self.inner.pipeline.run(socket, done);
    }

    /// Start admitting `client`.
    ///
    /// The returned server socket is not yet registered. Once the pipeline
    /// passes, the two sockets are bridged, the server socket is registered
    /// and [`CONNECTION_EVENT`] fires with it. If any middleware rejects, the
    /// client receives exactly one [`ERROR_EVENT`] carrying the message, on a
    /// later scheduling turn, and nothing is registered. The error is held
    /// on the client, so a listener attached after this returns still gets it.
    pub fn add<C>(&self, client: &C) -> ServerSocket
    where
        C: Endpoint + ?Sized,
    {
        let socket = ServerSocket::new(self);
        let namespace = self.downgrade();
        let pending = PendingClient {
            id: client.id().to_string(),
            wire: client.wire().clone(),
        };
        let admitted = socket.clone();

        debug!(
            "Admitting client {} as socket {} on {}",
            pending.id,
            socket.id(),
            self.inner.name
        );
        self.run(&socket, move |result| match namespace.upgrade() {
            Some(inner) => Namespace::from_inner(inner).settle(result, pending, admitted),
            None => debug!(
                "Namespace dropped before socket {} settled",
                admitted.id()
            ),
        });
        socket
    }

    fn settle(&self, result: Admission, client: PendingClient, socket: ServerSocket) {
        let result = result.and_then(|()| {
            bridge(&client, &socket)
                .map_err(|e| MiddlewareError::with_source(e.to_string(), e))
        });

        match result {
            Ok(()) => {
                self.inner.connected.insert(socket.clone());
                info!(
                    "Socket {} connected to namespace {} ({} connected)",
                    socket.id(),
                    self.inner.name,
                    self.inner.connected.len()
                );
                self.inner.events.emit(CONNECTION_EVENT, &socket);
            }
            Err(error) => {
                warn!(
                    "Socket {} rejected by namespace {}: {}",
                    socket.id(),
                    self.inner.name,
                    error
                );
                // Rooms joined by middleware before the rejection
                self.inner.adapter.del_all(socket.id());
                client.wire.hold(
                    ERROR_EVENT,
                    vec![Value::String(error.message().to_string())],
                );
            }
        }
    }

    /// Unregister a socket and drop its room memberships. Unknown sockets are
    /// ignored.
    pub fn remove(&self, socket: &ServerSocket) {
        self.inner.adapter.del_all(socket.id());
        if self.inner.connected.remove(socket.id()).is_some() {
            debug!(
                "Removed socket {} from namespace {}",
                socket.id(),
                self.inner.name
            );
        }
    }

    /// Listen for admitted sockets
    pub fn on_connection<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ServerSocket) + Send + Sync + 'static,
    {
        self.inner.events.on(CONNECTION_EVENT, listener)
    }

    /// Listen for the next admitted socket only
    pub fn once_connection<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ServerSocket) + Send + Sync + 'static,
    {
        self.inner.events.once(CONNECTION_EVENT, listener)
    }

    /// Remove a connection listener
    pub fn off_connection(&self, id: ListenerId) -> bool {
        self.inner.events.off(CONNECTION_EVENT, id)
    }

    /// Broadcast to every connected socket in `room`
    pub fn to(&self, room: &str) -> BroadcastOperator {
        BroadcastOperator::new(Arc::clone(&self.inner.adapter), room)
    }
}
