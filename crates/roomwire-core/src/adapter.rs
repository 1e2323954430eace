//! Room registry
//!
//! The namespace never reads room membership itself. It hands broadcast
//! requests to an [`Adapter`], which resolves rooms to connected sockets.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::registry::Registry;
use crate::socket::Payload;

/// Event and arguments delivered by a broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastPacket {
    pub event: String,
    #[serde(default)]
    pub data: Payload,
}

impl BroadcastPacket {
    pub fn new(event: impl Into<String>, data: Payload) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Scope of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOptions {
    /// Socket IDs that must not receive the packet
    #[serde(default)]
    pub except: Vec<String>,
    /// Target rooms; empty means every connected socket
    #[serde(default)]
    pub rooms: Vec<String>,
}

impl BroadcastOptions {
    /// Scope a broadcast to a single room with nobody excluded
    pub fn room(room: impl Into<String>) -> Self {
        Self {
            except: Vec::new(),
            rooms: vec![room.into()],
        }
    }
}

/// Room membership store and broadcaster
pub trait Adapter: Send + Sync + fmt::Debug {
    /// Add a socket to a room
    fn add(&self, id: &str, room: &str);

    /// Remove a socket from a room
    fn del(&self, id: &str, room: &str);

    /// Remove a socket from every room it is in
    fn del_all(&self, id: &str);

    /// Rooms a socket is in
    fn rooms(&self, id: &str) -> Vec<String>;

    /// Socket IDs in a room
    fn sockets(&self, room: &str) -> Vec<String>;

    /// Deliver `packet` to every socket in scope. Fire-and-forget.
    fn broadcast(&self, packet: &BroadcastPacket, options: &BroadcastOptions);
}

/// Process-local [`Adapter`] backed by two `DashMap` indexes
#[derive(Debug)]
pub struct InMemoryAdapter {
    rooms: DashMap<String, HashSet<String>>,
    memberships: DashMap<String, HashSet<String>>,
    registry: Registry,
}

impl InMemoryAdapter {
    /// Create an adapter resolving socket IDs through `registry`
    pub fn new(registry: Registry) -> Self {
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            registry,
        }
    }

    /// Number of non-empty rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn targets(&self, options: &BroadcastOptions) -> Vec<String> {
        let except: HashSet<&str> = options.except.iter().map(String::as_str).collect();

        let candidates = if options.rooms.is_empty() {
            self.registry.ids()
        } else {
            let mut seen = HashSet::new();
            let mut ids = Vec::new();
            for room in &options.rooms {
                for id in self.sockets(room) {
                    if seen.insert(id.clone()) {
                        ids.push(id);
                    }
                }
            }
            ids
        };

        candidates
            .into_iter()
            .filter(|id| !except.contains(id.as_str()))
            .collect()
    }
}

impl Adapter for InMemoryAdapter {
    fn add(&self, id: &str, room: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(id.to_string());
        self.memberships
            .entry(id.to_string())
            .or_default()
            .insert(room.to_string());
    }

    fn del(&self, id: &str, room: &str) {
        self.rooms.remove_if_mut(room, |_, members| {
            members.remove(id);
            members.is_empty()
        });
        self.memberships.remove_if_mut(id, |_, rooms| {
            rooms.remove(room);
            rooms.is_empty()
        });
    }

    fn del_all(&self, id: &str) {
        let Some((_, rooms)) = self.memberships.remove(id) else {
            return;
        };
        for room in rooms {
            self.rooms.remove_if_mut(&room, |_, members| {
                members.remove(id);
                members.is_empty()
            });
        }
    }

    fn rooms(&self, id: &str) -> Vec<String> {
        self.memberships
            .get(id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn sockets(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn broadcast(&self, packet: &BroadcastPacket, options: &BroadcastOptions) {
        // Resolve targets before delivering so listeners may join or leave rooms
        let targets = self.targets(options);
        let mut delivered = 0usize;
        for id in targets {
            if let Some(socket) = self.registry.get(&id) {
                socket.emit(&packet.event, packet.data.clone());
                delivered += 1;
            }
        }
        debug!(
            "Broadcast '{}' to rooms {:?} reached {} socket(s)",
            packet.event, options.rooms, delivered
        );
    }
}
