//! Id allocation and ownership of registered peers.
//!
//! # Id Space
//!
//! ```text
//! 1 ──────────────────────────────────────────────► i32::MAX
//! │ reserved in multiplayer mode                         │
//! └── next_id advances monotonically, wraps to first ────┘
//! ```
//!
//! Ids are unique among live entries and only handed out again after the
//! entry holding them has been removed.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::PeerId;

// ============================================================================
// PeerRegistry
// ============================================================================

/// Map of live peer ids to their owned values.
#[derive(Debug)]
pub struct PeerRegistry<P> {
    entries: FxHashMap<PeerId, P>,
    first_id: u32,
    next_id: u32,
}

impl<P> Default for PeerRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PeerRegistry<P> {
    /// Creates an empty registry allocating from id 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            first_id: 1,
            next_id: 1,
        }
    }

    /// Reserves id 1 for the server itself, or releases it.
    ///
    /// Restarts allocation at the first available id.
    pub fn set_reserve_server_id(&mut self, reserve: bool) {
        self.first_id = if reserve {
            PeerId::SERVER.as_u32() + 1
        } else {
            1
        };
        self.next_id = self.first_id;
    }

    /// Returns `true` if id 1 is reserved.
    #[inline]
    #[must_use]
    pub fn reserves_server_id(&self) -> bool {
        self.first_id > PeerId::SERVER.as_u32()
    }

    /// Picks the next free id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if every id is taken.
    pub fn allocate_id(&mut self) -> Result<PeerId> {
        let span = (PeerId::MAX - self.first_id + 1) as usize;
        if self.entries.len() >= span {
            return Err(Error::invalid_state("peer id space exhausted"));
        }

        let mut candidate = self.next_id;
        loop {
            if candidate > PeerId::MAX || candidate < self.first_id {
                candidate = self.first_id;
            }
            if let Some(id) = PeerId::new(candidate)
                && !self.entries.contains_key(&id)
            {
                self.next_id = candidate.wrapping_add(1);
                trace!(peer_id = %id, "Peer id allocated");
                return Ok(id);
            }
            candidate += 1;
        }
    }

    /// Inserts a value under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if `id` is already registered.
    pub fn register(&mut self, id: PeerId, peer: P) -> Result<()> {
        if self.entries.contains_key(&id) {
            return Err(Error::invalid_state(format!("peer {id} already registered")));
        }
        self.entries.insert(id, peer);
        Ok(())
    }

    /// Removes and returns the value under `id`.
    pub fn unregister(&mut self, id: PeerId) -> Option<P> {
        self.entries.remove(&id)
    }

    /// Looks up a peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerNotFound`] if `id` is not registered.
    pub fn get(&self, id: PeerId) -> Result<&P> {
        self.entries.get(&id).ok_or_else(|| Error::peer_not_found(id))
    }

    /// Looks up a peer mutably.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerNotFound`] if `id` is not registered.
    pub fn get_mut(&mut self, id: PeerId) -> Result<&mut P> {
        self.entries
            .get_mut(&id)
            .ok_or_else(|| Error::peer_not_found(id))
    }

    /// Returns `true` if `id` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: PeerId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of registered peers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no peer is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterates over every entry mutably, in no particular order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PeerId, &mut P)> {
        self.entries.iter_mut().map(|(id, peer)| (*id, peer))
    }

    /// Removes every entry.
    pub fn drain(&mut self) -> impl Iterator<Item = (PeerId, P)> + '_ {
        self.entries.drain()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn id(n: u32) -> PeerId {
        PeerId::new(n).unwrap()
    }

    #[test]
    fn test_allocation_is_monotonic() {
        let mut registry: PeerRegistry<()> = PeerRegistry::new();
        let a = registry.allocate_id().unwrap();
        registry.register(a, ()).unwrap();
        let b = registry.allocate_id().unwrap();
        assert_eq!(a, id(1));
        assert_eq!(b, id(2));
    }

    #[test]
    fn test_removed_id_not_reused_immediately() {
        let mut registry = PeerRegistry::new();
        let a = registry.allocate_id().unwrap();
        registry.register(a, "a").unwrap();
        registry.unregister(a);

        assert_eq!(registry.allocate_id().unwrap(), id(2));
    }

    #[test]
    fn test_reserved_server_id() {
        let mut registry: PeerRegistry<()> = PeerRegistry::new();
        registry.set_reserve_server_id(true);
        assert!(registry.reserves_server_id());
        assert_eq!(registry.allocate_id().unwrap(), id(2));

        registry.set_reserve_server_id(false);
        assert_eq!(registry.allocate_id().unwrap(), id(1));
    }

    #[test]
    fn test_wraps_and_skips_live_ids() {
        let mut registry = PeerRegistry::new();
        registry.register(id(1), ()).unwrap();
        registry.register(id(2), ()).unwrap();
        registry.next_id = PeerId::MAX;

        assert_eq!(registry.allocate_id().unwrap(), id(PeerId::MAX));
        assert_eq!(registry.allocate_id().unwrap(), id(3));
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut registry = PeerRegistry::new();
        registry.register(id(5), 1).unwrap();
        let err = registry.register(id(5), 2).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(*registry.get(id(5)).unwrap(), 1);
    }

    #[test]
    fn test_get_missing() {
        let mut registry: PeerRegistry<u8> = PeerRegistry::new();
        assert!(matches!(
            registry.get(id(9)),
            Err(Error::PeerNotFound { peer_id }) if peer_id == id(9)
        ));
        assert!(registry.get_mut(id(9)).is_err());
        assert!(registry.unregister(id(9)).is_none());
    }

    #[test]
    fn test_ids_sorted_and_drain() {
        let mut registry = PeerRegistry::new();
        for n in [7, 3, 5] {
            registry.register(id(n), n).unwrap();
        }
        assert_eq!(registry.ids(), vec![id(3), id(5), id(7)]);

        for (_, value) in registry.iter_mut() {
            *value *= 10;
        }
        assert_eq!(*registry.get(id(5)).unwrap(), 50);

        assert_eq!(registry.drain().count(), 3);
        assert!(registry.is_empty());
    }

    proptest! {
        #[test]
        fn prop_live_ids_are_unique(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let mut registry = PeerRegistry::new();
            let mut live: Vec<PeerId> = Vec::new();

            for insert in ops {
                if insert || live.is_empty() {
                    let id = registry.allocate_id().unwrap();
                    prop_assert!(!live.contains(&id));
                    registry.register(id, ()).unwrap();
                    live.push(id);
                } else {
                    let id = live.remove(0);
                    registry.unregister(id);
                }
                prop_assert_eq!(registry.len(), live.len());
            }
        }
    }
}
