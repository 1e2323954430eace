//! Connected-peer registry

use dashmap::DashMap;
use std::sync::Arc;

use crate::socket::ServerSocket;

/// Map of socket ID to admitted server socket.
///
/// Cloning yields another handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sockets: Arc<DashMap<String, ServerSocket>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket under its ID
    pub fn insert(&self, socket: ServerSocket) {
        self.sockets.insert(socket.id().to_string(), socket);
    }

    /// Remove a socket; absent IDs are ignored
    pub fn remove(&self, id: &str) -> Option<ServerSocket> {
        self.sockets.remove(id).map(|(_, socket)| socket)
    }

    /// Get a socket by ID
    pub fn get(&self, id: &str) -> Option<ServerSocket> {
        self.sockets.get(id).map(|entry| entry.value().clone())
    }

    /// Check if a socket is registered
    pub fn contains(&self, id: &str) -> bool {
        self.sockets.contains_key(id)
    }

    /// Get registered socket count
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Get all registered socket IDs
    pub fn ids(&self) -> Vec<String> {
        self.sockets.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get all registered sockets
    pub fn sockets(&self) -> Vec<ServerSocket> {
        self.sockets
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
