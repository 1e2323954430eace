//! Roomwire Core - in-memory namespaces for room-based real-time messaging
//!
//! This crate admits client sockets into a namespace through an ordered
//! middleware pipeline, fuses each admitted client with a fresh server socket
//! into one duplex channel, tracks connected peers and broadcasts to rooms.

mod adapter;
mod bridge;
mod emitter;
mod error;
mod middleware;
mod namespace;
mod operators;
mod registry;
mod schedule;
mod server;
mod socket;

pub use adapter::{Adapter, BroadcastOptions, BroadcastPacket, InMemoryAdapter};
pub use bridge::bridge;
pub use emitter::{EventEmitter, Listener, ListenerId};
pub use error::{BridgeError, Error, MiddlewareError, Result, SocketError};
pub use middleware::{
    from_async, inspect, Admission, AsyncMiddleware, Inspect, Middleware, Next, Pipeline,
};
pub use namespace::{Namespace, CONNECTION_EVENT, ERROR_EVENT};
pub use operators::BroadcastOperator;
pub use registry::Registry;
pub use server::{Server, ServerConfig, CAPACITY_MESSAGE};
pub use socket::{
    ClientSocket, Endpoint, Payload, ServerSocket, Wire, DISCONNECT_EVENT, DISCONNECT_REASON,
};
