//! Notifications emitted by [`Server::poll`](crate::Server::poll).

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::PeerId;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked synchronously from within `poll`.
pub type EventHandler = Box<dyn FnMut(ServerEvent) + Send>;

// ============================================================================
// ServerEvent
// ============================================================================

/// A change in peer state observed during a poll tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A handshake completed and the peer was registered.
    Connected {
        /// New peer id.
        id: PeerId,
        /// Negotiated subprotocol. Always empty: none is selected.
        protocol: String,
    },

    /// A peer left and was removed from the registry.
    Disconnected {
        /// Removed peer id.
        id: PeerId,
        /// `true` if the peer sent a close frame before leaving.
        was_clean: bool,
    },

    /// New packets are waiting in the peer's inbound queue.
    DataReceived {
        /// Peer id.
        id: PeerId,
    },

    /// The peer sent a close frame.
    CloseRequested {
        /// Peer id.
        id: PeerId,
        /// Close status code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

impl ServerEvent {
    /// Id of the peer the event refers to.
    #[inline]
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        match self {
            Self::Connected { id, .. }
            | Self::Disconnected { id, .. }
            | Self::DataReceived { id }
            | Self::CloseRequested { id, .. } => *id,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id() {
        let id = PeerId::new(42).unwrap();
        let events = [
            ServerEvent::Connected {
                id,
                protocol: String::new(),
            },
            ServerEvent::Disconnected {
                id,
                was_clean: true,
            },
            ServerEvent::DataReceived { id },
            ServerEvent::CloseRequested {
                id,
                code: 1000,
                reason: String::new(),
            },
        ];
        assert!(events.iter().all(|event| event.peer_id() == id));
    }
}
