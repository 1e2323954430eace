//! Client-side and server-side sockets
//!
//! Both variants own a [`Wire`]: an inbound event bus plus a write-once
//! outbound target that the bridge points at the peer's inbound bus.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;
use uuid::Uuid;

use crate::emitter::{EventEmitter, Listener, ListenerId};
use crate::error::SocketError;
use crate::namespace::{Namespace, NamespaceInner};
use crate::operators::BroadcastOperator;
use crate::schedule::defer;

/// Ordered event arguments carried by socket events
pub type Payload = Vec<Value>;

/// Event fired on a server socket's own listeners when it disconnects
pub const DISCONNECT_EVENT: &str = "disconnect";

/// Reason passed with [`DISCONNECT_EVENT`] by [`ServerSocket::disconnect`]
pub const DISCONNECT_REASON: &str = "server namespace disconnect";

/// An event parked on a wire until its listeners have had a chance to attach
struct Held {
    event: String,
    payload: Payload,
    /// A release task is queued on a runtime
    scheduled: bool,
    /// The listeners present at release time have run
    released: bool,
}

struct WireInner {
    inbound: EventEmitter<Payload>,
    outbound: OnceLock<EventEmitter<Payload>>,
    held: Mutex<Vec<Held>>,
}

/// Dispatch slots of one endpoint.
///
/// `send` goes to the outbound target once one is installed and to the
/// endpoint's own listeners before that. The target can be set only once.
///
/// A held event reaches every listener of its name exactly once: those
/// present when it is released, and each one registered afterwards at
/// registration. Release happens on a later turn of the ambient Tokio
/// runtime, on [`Wire::release`], or at the first matching registration
/// when no runtime was available to queue it.
#[derive(Clone)]
pub struct Wire {
    inner: Arc<WireInner>,
}

impl Default for Wire {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wire")
            .field("inbound", &self.inner.inbound)
            .field("bridged", &self.is_bridged())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Wire {
    /// Create an unbridged wire
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WireInner {
                inbound: EventEmitter::new(),
                outbound: OnceLock::new(),
                held: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The bus that local listeners are registered on
    pub fn inbound(&self) -> &EventEmitter<Payload> {
        &self.inner.inbound
    }

    /// Whether an outbound target has been installed
    pub fn is_bridged(&self) -> bool {
        self.inner.outbound.get().is_some()
    }

    /// Send an event outward
    pub fn send(&self, event: &str, payload: &Payload) -> bool {
        match self.inner.outbound.get() {
            Some(target) => target.emit(event, payload),
            None => self.inner.inbound.emit(event, payload),
        }
    }

    /// Fire the local listeners of an event
    pub fn dispatch(&self, event: &str, payload: &Payload) -> bool {
        self.inner.inbound.emit(event, payload)
    }

    /// Install the outbound target. Returns `false` if one was already set.
    pub(crate) fn retarget(&self, target: EventEmitter<Payload>) -> bool {
        self.inner.outbound.set(target).is_ok()
    }

    /// Register a local listener, replaying any released held event of the
    /// same name to it
    pub fn listen<F>(&self, event: &str, listener: F, once: bool) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let listener: Listener<Payload> = Arc::new(listener);
        let mut due: Vec<(Vec<Listener<Payload>>, Payload)> = Vec::new();
        let mut wants_more = true;

        let id = {
            let mut held = self.inner.held.lock();
            for entry in held.iter_mut().filter(|entry| entry.event == event) {
                if entry.scheduled && !entry.released {
                    // The queued release will pick this listener up
                    continue;
                }
                let mut targets = if entry.released {
                    Vec::new()
                } else {
                    entry.released = true;
                    self.inner.inbound.take(event)
                };
                if wants_more {
                    targets.push(Arc::clone(&listener));
                    wants_more = !once;
                }
                due.push((targets, entry.payload.clone()));
            }

            if wants_more {
                self.inner.inbound.insert(event, listener, once)
            } else {
                self.inner.inbound.reserve_id()
            }
        };

        for (targets, payload) in due {
            for target in targets {
                target(&payload);
            }
        }
        id
    }

    /// Park `payload` until listeners can attach, then deliver it as `event`.
    ///
    /// Never runs a listener on the caller's stack.
    pub(crate) fn hold(&self, event: &str, payload: Payload) {
        let index = {
            let mut held = self.inner.held.lock();
            held.push(Held {
                event: event.to_string(),
                payload,
                scheduled: false,
                released: false,
            });
            held.len() - 1
        };

        let wire = self.clone();
        let scheduled = defer(move || wire.release_one(index));
        if scheduled {
            if let Some(entry) = self.inner.held.lock().get_mut(index) {
                entry.scheduled = !entry.released;
            }
        } else {
            debug!("No runtime to release held {} event, waiting for a listener", event);
        }
    }

    /// Deliver every unreleased held event to the listeners present now
    pub fn release(&self) {
        let count = self.inner.held.lock().len();
        for index in 0..count {
            self.release_one(index);
        }
    }

    fn release_one(&self, index: usize) {
        let (targets, payload) = {
            let mut held = self.inner.held.lock();
            let Some(entry) = held.get_mut(index) else {
                return;
            };
            if entry.released {
                return;
            }
            entry.released = true;
            (self.inner.inbound.take(&entry.event), entry.payload.clone())
        };

        for target in targets {
            target(&payload);
        }
    }

    /// Number of held events not yet released
    pub fn pending(&self) -> usize {
        self.inner
            .held
            .lock()
            .iter()
            .filter(|entry| !entry.released)
            .count()
    }
}

/// The surface the bridge and the namespace need from a socket
pub trait Endpoint {
    /// Unique identifier of this endpoint
    fn id(&self) -> &str;

    /// Dispatch slots of this endpoint
    fn wire(&self) -> &Wire;
}

struct ClientSocketInner {
    id: String,
    wire: Wire,
}

/// The client-side end of a connection
#[derive(Clone)]
pub struct ClientSocket {
    inner: Arc<ClientSocketInner>,
}

impl Default for ClientSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSocket")
            .field("id", &self.inner.id)
            .field("bridged", &self.is_bridged())
            .finish()
    }
}

impl PartialEq for ClientSocket {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ClientSocket {}

impl ClientSocket {
    /// Create a new, unconnected client socket
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClientSocketInner {
                id: Uuid::new_v4().to_string(),
                wire: Wire::new(),
            }),
        }
    }

    /// Get socket ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Listen for events arriving at this client
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.inner.wire.listen(event, listener, false)
    }

    /// Listen for the next occurrence of an event
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.inner.wire.listen(event, listener, true)
    }

    /// Remove a listener
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.wire.inbound().off(event, id)
    }

    /// Send an event towards the server side
    pub fn emit(&self, event: &str, payload: Payload) -> bool {
        self.inner.wire.send(event, &payload)
    }

    /// Whether this client has been bridged to a server socket
    pub fn is_bridged(&self) -> bool {
        self.inner.wire.is_bridged()
    }

    /// Deliver held admission errors to the listeners attached now.
    ///
    /// Only needed outside a Tokio runtime, where nothing else releases them
    /// until an `"error"` listener is registered.
    pub fn release(&self) {
        self.inner.wire.release();
    }

    /// Number of admission errors not yet delivered
    pub fn pending_errors(&self) -> usize {
        self.inner.wire.pending()
    }
}

impl Endpoint for ClientSocket {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn wire(&self) -> &Wire {
        &self.inner.wire
    }
}

struct ServerSocketInner {
    id: String,
    created_at: DateTime<Utc>,
    wire: Wire,
    namespace: Weak<NamespaceInner>,
    namespace_name: String,
    metadata: Mutex<HashMap<String, Value>>,
}

/// The server-side end of a connection, created by the namespace for every
/// connection attempt
#[derive(Clone)]
pub struct ServerSocket {
    inner: Arc<ServerSocketInner>,
}

impl fmt::Debug for ServerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSocket")
            .field("id", &self.inner.id)
            .field("namespace", &self.inner.namespace_name)
            .field("created_at", &self.inner.created_at)
            .field("bridged", &self.is_bridged())
            .finish()
    }
}

/// Identity comparison: two handles are equal when they point at the same socket
impl PartialEq for ServerSocket {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ServerSocket {}

impl ServerSocket {
    /// Create a fresh server socket owned by `namespace`
    pub fn new(namespace: &Namespace) -> Self {
        Self {
            inner: Arc::new(ServerSocketInner {
                id: Uuid::new_v4().to_string(),
                created_at: Utc::now(),
                wire: Wire::new(),
                namespace: namespace.downgrade(),
                namespace_name: namespace.name().to_string(),
                metadata: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get socket ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Socket creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// The owning namespace, if it is still alive
    pub fn namespace(&self) -> Option<Namespace> {
        self.inner.namespace.upgrade().map(Namespace::from_inner)
    }

    /// Listen for events sent by the client
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.inner.wire.listen(event, listener, false)
    }

    /// Listen for the next occurrence of an event
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.inner.wire.listen(event, listener, true)
    }

    /// Remove a listener
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.wire.inbound().off(event, id)
    }

    /// Send an event to the peer
    pub fn emit(&self, event: &str, payload: Payload) -> bool {
        self.inner.wire.send(event, &payload)
    }

    /// Fire this socket's own listeners
    pub fn dispatch(&self, event: &str, payload: Payload) -> bool {
        self.inner.wire.dispatch(event, &payload)
    }

    /// Whether the bridge to the client has been installed
    pub fn is_bridged(&self) -> bool {
        self.inner.wire.is_bridged()
    }

    /// Read one metadata entry
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.inner.metadata.lock().get(key).cloned()
    }

    /// Set one metadata entry, returning the previous value
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.metadata.lock().insert(key.into(), value)
    }

    /// Mutate the metadata map in place
    pub fn update_metadata<R>(&self, f: impl FnOnce(&mut HashMap<String, Value>) -> R) -> R {
        let mut metadata = self.inner.metadata.lock();
        f(&mut metadata)
    }

    /// Join a room
    pub fn join(&self, room: &str) -> Result<(), SocketError> {
        let namespace = self.require_namespace()?;
        namespace.adapter().add(self.id(), room);
        debug!("Socket {} joined room {}", self.id(), room);
        Ok(())
    }

    /// Leave a room
    pub fn leave(&self, room: &str) -> Result<(), SocketError> {
        let namespace = self.require_namespace()?;
        namespace.adapter().del(self.id(), room);
        debug!("Socket {} left room {}", self.id(), room);
        Ok(())
    }

    /// Rooms this socket is currently in
    pub fn rooms(&self) -> Vec<String> {
        self.namespace()
            .map(|namespace| namespace.adapter().rooms(self.id()))
            .unwrap_or_default()
    }

    /// Broadcast to a room, excluding this socket
    pub fn to(&self, room: &str) -> Result<BroadcastOperator, SocketError> {
        let namespace = self.require_namespace()?;
        Ok(namespace.to(room).except(self.id()))
    }

    /// Remove this socket from its namespace and notify local listeners
    pub fn disconnect(&self) {
        if let Some(namespace) = self.namespace() {
            namespace.remove(self);
        }
        self.dispatch(
            DISCONNECT_EVENT,
            vec![Value::String(DISCONNECT_REASON.to_string())],
        );
    }

    fn require_namespace(&self) -> Result<Namespace, SocketError> {
        self.namespace()
            .ok_or_else(|| SocketError::NamespaceDropped(self.inner.id.clone()))
    }
}

impl Endpoint for ServerSocket {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn wire(&self) -> &Wire {
        &self.inner.wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<Payload>>>, impl Fn(&Payload) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |payload: &Payload| sink.lock().push(payload.clone()))
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = ClientSocket::new();
        let b = ClientSocket::new();
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_unbridged_client_emits_to_itself() {
        let client = ClientSocket::new();
        let (seen, listener) = recorder();
        client.on("echo", listener);

        assert!(client.emit("echo", vec![json!("hi")]));
        assert_eq!(*seen.lock(), vec![vec![json!("hi")]]);
        assert!(!client.is_bridged());
    }

    #[test]
    fn test_wire_retarget_is_write_once() {
        let wire = Wire::new();
        let first = EventEmitter::new();
        let second = EventEmitter::new();

        assert!(wire.retarget(first));
        assert!(!wire.retarget(second));
        assert!(wire.is_bridged());
    }

    #[test]
    fn test_held_event_waits_for_listener_without_runtime() {
        let wire = Wire::new();
        wire.hold("error", vec![json!("denied")]);
        assert_eq!(wire.pending(), 1);

        let (seen, listener) = recorder();
        wire.listen("error", listener, false);

        assert_eq!(*seen.lock(), vec![vec![json!("denied")]]);
        assert_eq!(wire.pending(), 0);
    }

    #[test]
    fn test_held_event_reaches_each_listener_once() {
        let wire = Wire::new();
        let (early, listener) = recorder();
        wire.listen("error", listener, false);
        wire.hold("error", vec![json!("denied")]);
        assert!(early.lock().is_empty());

        wire.release();
        wire.release();
        let (late, listener) = recorder();
        wire.listen("error", listener, false);
        let (late_once, listener) = recorder();
        wire.listen("error", listener, true);

        assert_eq!(early.lock().len(), 1);
        assert_eq!(late.lock().len(), 1);
        assert_eq!(late_once.lock().len(), 1);
        // Replayed once listeners are not kept
        assert_eq!(wire.inbound().listener_count("error"), 2);
    }

    #[test]
    fn test_held_event_ignores_other_names() {
        let wire = Wire::new();
        wire.hold("error", vec![json!("denied")]);

        let (seen, listener) = recorder();
        wire.listen("chat", listener, false);

        assert!(seen.lock().is_empty());
        assert_eq!(wire.pending(), 1);
    }

    #[tokio::test]
    async fn test_held_event_released_on_later_turn() {
        let client = ClientSocket::new();
        let (seen, listener) = recorder();
        client.on("error", listener);

        client.inner.wire.hold("error", vec![json!("denied")]);
        let (late, listener) = recorder();
        client.on("error", listener);
        assert!(seen.lock().is_empty());
        assert!(late.lock().is_empty());

        for _ in 0..16 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(late.lock().len(), 1);
        assert_eq!(client.pending_errors(), 0);
    }

    #[test]
    fn test_server_socket_metadata() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);

        assert!(socket.metadata("user").is_none());
        socket.set_metadata("user", json!("alice"));
        assert_eq!(socket.metadata("user"), Some(json!("alice")));

        let len = socket.update_metadata(|metadata| {
            metadata.insert("role".to_string(), json!("admin"));
            metadata.len()
        });
        assert_eq!(len, 2);
    }

    #[test]
    fn test_server_socket_knows_namespace() {
        let namespace = Namespace::new("/chat");
        let socket = ServerSocket::new(&namespace);

        let owner = socket.namespace().unwrap();
        assert_eq!(owner.name(), "/chat");
        assert!(socket.created_at() <= Utc::now());
    }

    #[test]
    fn test_rooms_require_live_namespace() {
        let socket = {
            let namespace = Namespace::new("/");
            ServerSocket::new(&namespace)
        };

        assert!(socket.namespace().is_none());
        assert_eq!(
            socket.join("lobby"),
            Err(SocketError::NamespaceDropped(socket.id().to_string()))
        );
        assert!(socket.rooms().is_empty());
    }

    #[test]
    fn test_join_and_leave() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);

        socket.join("lobby").unwrap();
        socket.join("games").unwrap();
        let mut rooms = socket.rooms();
        rooms.sort();
        assert_eq!(rooms, vec!["games".to_string(), "lobby".to_string()]);

        socket.leave("lobby").unwrap();
        assert_eq!(socket.rooms(), vec!["games".to_string()]);
    }

    #[test]
    fn test_disconnect_fires_local_event() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let (seen, listener) = recorder();
        socket.on(DISCONNECT_EVENT, listener);
        socket.join("lobby").unwrap();

        socket.disconnect();

        assert_eq!(*seen.lock(), vec![vec![json!(DISCONNECT_REASON)]]);
        assert!(socket.rooms().is_empty());
    }
}
