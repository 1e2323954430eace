//! Broadcast builder returned by `to(room)`

use std::fmt;
use std::sync::Arc;

use crate::adapter::{Adapter, BroadcastOptions, BroadcastPacket};
use crate::socket::Payload;

/// Pending broadcast: target rooms and exclusions, sent on [`emit`](Self::emit)
#[derive(Clone)]
pub struct BroadcastOperator {
    adapter: Arc<dyn Adapter>,
    options: BroadcastOptions,
}

impl fmt::Debug for BroadcastOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastOperator")
            .field("rooms", &self.options.rooms)
            .field("except", &self.options.except)
            .finish()
    }
}

impl BroadcastOperator {
    pub(crate) fn new(adapter: Arc<dyn Adapter>, room: &str) -> Self {
        Self {
            adapter,
            options: BroadcastOptions::room(room),
        }
    }

    /// Also target `room`
    pub fn to(mut self, room: &str) -> Self {
        if !self.options.rooms.iter().any(|r| r == room) {
            self.options.rooms.push(room.to_string());
        }
        self
    }

    /// Skip the socket with this ID
    pub fn except(mut self, id: &str) -> Self {
        if !self.options.except.iter().any(|e| e == id) {
            self.options.except.push(id.to_string());
        }
        self
    }

    /// Current scope
    pub fn options(&self) -> &BroadcastOptions {
        &self.options
    }

    /// Hand the packet to the adapter
    pub fn emit(&self, event: &str, data: Payload) {
        self.adapter
            .broadcast(&BroadcastPacket::new(event, data), &self.options);
    }
}
