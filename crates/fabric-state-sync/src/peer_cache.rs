//! Per-peer receive state for traffic outside sessions.
//!
//! Unencrypted UDP messages and group-keyed messages are screened for
//! duplicates against state kept per peer node. The cache has a fixed
//! capacity; once full, a new peer replaces the least recently used entry,
//! preferring one whose group-key counter was never synchronized since that
//! state is the cheapest to reacquire.

use fabric_state_core::{NodeId, ReceiveState};
use tracing::debug;

/// Receive state kept for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerStateEntry {
    pub node_id: NodeId,
    pub unencrypted: ReceiveState,
    pub group_key: ReceiveState,
}

impl PeerStateEntry {
    fn new(node_id: NodeId) -> Self {
        Self { node_id, unencrypted: ReceiveState::new(), group_key: ReceiveState::new() }
    }
}

/// LRU cache of [`PeerStateEntry`]s.
#[derive(Debug)]
pub struct PeerStateCache {
    entries: Vec<PeerStateEntry>,
    /// Entry indices, most recently used first.
    mru: Vec<u16>,
    capacity: usize,
}

impl PeerStateCache {
    /// Create a cache for `capacity` peers, clamped to `1..=u16::MAX`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, u16::MAX as usize);
        Self { entries: Vec::with_capacity(capacity), mru: Vec::with_capacity(capacity), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `peer` without touching recency.
    pub fn get(&self, peer: NodeId) -> Option<&PeerStateEntry> {
        self.entries.iter().find(|e| e.node_id == peer)
    }

    /// Look up `peer` and mark it most recently used.
    pub fn find(&mut self, peer: NodeId) -> Option<&mut PeerStateEntry> {
        let pos = self.position(peer)?;
        let index = self.promote(pos);
        Some(&mut self.entries[index])
    }

    /// Look up `peer`, allocating an entry if absent, and mark it most recently used.
    pub fn find_or_alloc(&mut self, peer: NodeId) -> &mut PeerStateEntry {
        let index = match self.position(peer) {
            Some(pos) => self.promote(pos),
            None => self.allocate(peer),
        };
        &mut self.entries[index]
    }

    /// Peers from most to least recently used.
    pub fn peers_by_recency(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.mru.iter().map(|&i| self.entries[i as usize].node_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.mru.clear();
    }

    fn position(&self, peer: NodeId) -> Option<usize> {
        self.mru.iter().position(|&i| self.entries[i as usize].node_id == peer)
    }

    /// Move the MRU list element at `pos` to the front; returns its entry index.
    fn promote(&mut self, pos: usize) -> usize {
        self.mru[..=pos].rotate_right(1);
        self.mru[0] as usize
    }

    fn allocate(&mut self, peer: NodeId) -> usize {
        if self.entries.len() < self.capacity {
            let index = self.entries.len();
            self.entries.push(PeerStateEntry::new(peer));
            self.mru.insert(0, index as u16);
            return index;
        }

        let last = self.mru.len() - 1;
        let victim = (0..=last)
            .rev()
            .find(|&pos| !self.entries[self.mru[pos] as usize].group_key.synchronized)
            .unwrap_or(last);
        let index = self.promote(victim);

        debug!(
            evicted = %self.entries[index].node_id,
            peer = %peer,
            "Replacing peer state entry"
        );
        self.entries[index] = PeerStateEntry::new(peer);
        index
    }
}
