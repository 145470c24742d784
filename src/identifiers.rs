//! Type-safe identifiers.
//!
//! Peer ids are handed out by the [`PeerRegistry`](crate::server::PeerRegistry)
//! and stay valid until the peer is removed. Callers keep the id, never a
//! reference to the peer, and re-resolve it through
//! [`Server::get_peer`](crate::Server::get_peer).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

// ============================================================================
// PeerId
// ============================================================================

/// Identifier of a registered WebSocket peer.
///
/// Always a positive 32-bit signed value (`1..=i32::MAX`), so it survives a
/// round trip through APIs that carry ids as `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PeerId(NonZeroU32);

impl PeerId {
    /// Largest id that can be assigned.
    pub const MAX: u32 = i32::MAX as u32;

    /// Id reserved for the server itself in multiplayer mode.
    pub const SERVER: PeerId = PeerId(NonZeroU32::MIN);

    /// Creates an id, returning `None` for 0 or values above [`PeerId::MAX`].
    #[inline]
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        if id > Self::MAX {
            return None;
        }
        NonZeroU32::new(id).map(Self)
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PeerId> for u32 {
    #[inline]
    fn from(id: PeerId) -> Self {
        id.as_u32()
    }
}

impl TryFrom<u32> for PeerId {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("peer id out of range: {value}"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero() {
        assert!(PeerId::new(0).is_none());
    }

    #[test]
    fn test_rejects_above_i32_max() {
        assert!(PeerId::new(PeerId::MAX).is_some());
        assert!(PeerId::new(PeerId::MAX + 1).is_none());
    }

    #[test]
    fn test_display() {
        let id = PeerId::new(42).unwrap();
        assert_eq!(id.to_string(), "42");
        assert_eq!(u32::from(id), 42);
    }

    #[test]
    fn test_server_id_is_one() {
        assert_eq!(PeerId::SERVER.as_u32(), 1);
    }

    #[test]
    fn test_serde_round_trip_rejects_zero() {
        let id: PeerId = serde_json::from_str("5").unwrap();
        assert_eq!(id.as_u32(), 5);
        assert!(serde_json::from_str::<PeerId>("0").is_err());
    }
}
