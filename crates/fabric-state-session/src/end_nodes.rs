//! Alternate peer identities of shared sessions.
//!
//! A shared session terminates at one node but carries traffic for several
//! logical end nodes behind it. Each registration names its session by
//! [`SessionHandle`], so a registration left behind by a recycled slot can
//! never match the slot's new occupant.

use fabric_state_core::{FabricError, NodeId, Result};

use crate::entry::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EndNodeEntry {
    end_node: NodeId,
    session: SessionHandle,
}

/// Fixed pool of (end node, session) registrations.
#[derive(Debug)]
pub struct SharedSessionEndNodeRegistry {
    slots: Box<[Option<EndNodeEntry>]>,
    max_per_session: usize,
}

impl SharedSessionEndNodeRegistry {
    pub fn new(capacity: usize, max_per_session: usize) -> Self {
        Self { slots: vec![None; capacity].into_boxed_slice(), max_per_session }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn max_per_session(&self) -> usize {
        self.max_per_session
    }

    /// Registrations in use across all sessions.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, session: SessionHandle, end_node: NodeId) -> bool {
        self.iter_session(session).any(|e| e.end_node == end_node)
    }

    pub fn count(&self, session: SessionHandle) -> usize {
        self.iter_session(session).count()
    }

    /// Register `end_node` for `session`, which terminates at `terminating_node`.
    ///
    /// Registering the terminating node itself, or an end node already
    /// present, changes nothing.
    pub fn add(
        &mut self,
        session: SessionHandle,
        terminating_node: NodeId,
        end_node: NodeId,
    ) -> Result<()> {
        if end_node == terminating_node || self.contains(session, end_node) {
            return Ok(());
        }
        if self.count(session) >= self.max_per_session {
            return Err(FabricError::TooManySharedSessionEndNodes);
        }
        let free = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(FabricError::TooManySharedSessionEndNodes)?;
        *free = Some(EndNodeEntry { end_node, session });
        Ok(())
    }

    /// End nodes registered for `session`, in pool order.
    pub fn end_nodes(&self, session: SessionHandle) -> impl Iterator<Item = NodeId> + '_ {
        self.iter_session(session).map(|e| e.end_node)
    }

    /// Release every registration of `session`; returns how many were freed.
    pub fn remove_session(&mut self, session: SessionHandle) -> usize {
        let mut removed = 0;
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(e) if e.session == session) {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    fn iter_session(&self, session: SessionHandle) -> impl Iterator<Item = &EndNodeEntry> + '_ {
        self.slots.iter().flatten().filter(move |e| e.session == session)
    }
}
