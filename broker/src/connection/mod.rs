//! Transport adapters that move frames from a session's outbound queue onto a
//! live connection.
//!
//! - `ws`: WebSocket reader/writer pumps with ping/pong liveness.
//! - `sse`: Server-Sent Events response stream.
//!
//! Both guarantee that a session leaves the registry whenever its connection
//! ends, however it ends.

pub mod sse;
pub mod ws;

use crate::registry::RegistryHandle;
use crate::session::SessionId;
use log::*;

/// Removes the session from the registry when dropped.
pub(crate) struct LeaveOnDrop {
    registry: RegistryHandle,
    session_id: SessionId,
}

impl LeaveOnDrop {
    pub(crate) fn new(registry: RegistryHandle, session_id: SessionId) -> Self {
        Self {
            registry,
            session_id,
        }
    }
}

impl Drop for LeaveOnDrop {
    fn drop(&mut self) {
        debug!("Connection for session {} closed, cleaning up", self.session_id);
        self.registry.leave(&self.session_id);
    }
}
