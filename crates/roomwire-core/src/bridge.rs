//! Duplex bridge
//!
//! Fuses two endpoints into one logical channel by pointing each side's
//! outbound target at the other side's inbound bus.

use tracing::debug;

use crate::error::BridgeError;
use crate::socket::{Endpoint, Wire};

/// Bridge two endpoints.
///
/// After this call, whatever `a` sends arrives at `b`'s listeners and whatever
/// `b` sends arrives at `a`'s listeners. A bridge is permanent. If either side
/// is already bridged nothing is changed and an error is returned.
pub fn bridge<A, B>(a: &A, b: &B) -> Result<(), BridgeError>
where
    A: Endpoint + ?Sized,
    B: Endpoint + ?Sized,
{
    if a.wire().is_bridged() {
        return Err(BridgeError::AlreadyBridged(a.id().to_string()));
    }
    if b.wire().is_bridged() {
        return Err(BridgeError::AlreadyBridged(b.id().to_string()));
    }

    link(a.id(), a.wire(), b.wire())?;
    link(b.id(), b.wire(), a.wire())?;
    debug!("Bridged {} <-> {}", a.id(), b.id());
    Ok(())
}

fn link(from_id: &str, from: &Wire, to: &Wire) -> Result<(), BridgeError> {
    if from.retarget(to.inbound().clone()) {
        Ok(())
    } else {
        Err(BridgeError::AlreadyBridged(from_id.to_string()))
    }
}
