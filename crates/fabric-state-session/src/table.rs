//! The session key table.
//!
//! A fixed arena of [`SessionKeyEntry`] slots. Callers hold
//! [`SessionHandle`]s; every accessor checks the handle's generation, so a
//! handle to a removed session fails with `KeyNotFound` instead of reaching
//! whatever session reused the slot.
//!
//! Among allocated entries `(key id, peer)` is unique. A shared session also
//! answers to every end node registered for it.

use fabric_state_core::{
    AuthMode, ConnectionId, EncryptionKey, EncryptionType, FabricError, KeyId, NodeId,
    RandomSource, ReceiveState, Result, SessionState,
};
use tracing::debug;

use crate::end_nodes::SharedSessionEndNodeRegistry;
use crate::entry::{SessionHandle, SessionKeyEntry};

/// Callback run with the key id and peer of every removed session.
pub type SessionEndCallback = Box<dyn FnMut(KeyId, NodeId)>;

/// Identifies a session-end subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u32);

/// Result of scanning for `(key id, peer)`.
enum Slot {
    Found(usize),
    Missing { free: Option<usize> },
}

/// Fixed-capacity table of session keys.
pub struct SessionKeyTable {
    entries: Box<[SessionKeyEntry]>,
    end_nodes: SharedSessionEndNodeRegistry,
    subscribers: Vec<(SubscriptionId, SessionEndCallback)>,
    next_subscription: u32,
}

impl SessionKeyTable {
    /// Create a table with `capacity` session slots and an end-node pool of
    /// `max_end_nodes`, at most `max_end_nodes_per_session` per session.
    ///
    /// `capacity` is clamped to `u16::MAX`.
    pub fn new(capacity: usize, max_end_nodes: usize, max_end_nodes_per_session: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        Self {
            entries: (0..capacity).map(|_| SessionKeyEntry::default()).collect(),
            end_nodes: SharedSessionEndNodeRegistry::new(max_end_nodes, max_end_nodes_per_session),
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn allocated_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_allocated()).count()
    }

    pub fn end_node_registry(&self) -> &SharedSessionEndNodeRegistry {
        &self.end_nodes
    }

    /// Resolve a handle.
    pub fn get(&self, session: SessionHandle) -> Result<&SessionKeyEntry> {
        match self.entries.get(session.index()) {
            Some(e) if e.generation == session.generation && e.is_allocated() => Ok(e),
            _ => Err(FabricError::KeyNotFound),
        }
    }

    pub(crate) fn get_mut(&mut self, session: SessionHandle) -> Result<&mut SessionKeyEntry> {
        match self.entries.get_mut(session.index()) {
            Some(e) if e.generation == session.generation && e.is_allocated() => Ok(e),
            _ => Err(FabricError::KeyNotFound),
        }
    }

    /// Allocated sessions with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (SessionHandle, &SessionKeyEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_allocated())
            .map(|(i, e)| (Self::handle_for(i, e), e))
    }

    fn handle_for(index: usize, entry: &SessionKeyEntry) -> SessionHandle {
        SessionHandle { index: index as u16, generation: entry.generation }
    }

    fn handle_at(&self, index: usize) -> SessionHandle {
        Self::handle_for(index, &self.entries[index])
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    fn lookup(&self, key_id: KeyId, peer: NodeId) -> Result<Slot> {
        if !key_id.is_session_key() {
            return Err(FabricError::WrongKeyType);
        }
        if !peer.is_peer_identity() {
            return Err(FabricError::InvalidArgument);
        }

        let mut free = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.is_allocated() {
                free.get_or_insert(i);
                continue;
            }
            if entry.key_id() != key_id {
                continue;
            }
            if entry.node_id == peer
                || (entry.is_shared() && self.end_nodes.contains(self.handle_at(i), peer))
            {
                return Ok(Slot::Found(i));
            }
        }
        Ok(Slot::Missing { free })
    }

    /// Find the session for `key_id` with `peer`.
    pub fn find(&self, key_id: KeyId, peer: NodeId) -> Result<SessionHandle> {
        match self.lookup(key_id, peer)? {
            Slot::Found(i) => Ok(self.handle_at(i)),
            Slot::Missing { .. } => Err(FabricError::KeyNotFound),
        }
    }

    /// Find the session for `key_id` with `peer`, claiming a blank slot if absent.
    ///
    /// A claimed slot has no key material, no reservation and no flags set.
    /// The boolean is true when the slot was claimed by this call.
    pub fn find_or_create(&mut self, key_id: KeyId, peer: NodeId) -> Result<(SessionHandle, bool)> {
        match self.lookup(key_id, peer)? {
            Slot::Found(i) => Ok((self.handle_at(i), false)),
            Slot::Missing { free: Some(i) } => {
                self.entries[i].init(peer, key_id, None);
                Ok((self.handle_at(i), true))
            }
            Slot::Missing { free: None } => Err(FabricError::TooManyKeys),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Allocate a session with `peer`.
    ///
    /// Without a requested key id, a random session key number is drawn and
    /// the numbers after it are tried in turn until one is unused with this
    /// peer. If the peer already holds every number the allocation fails
    /// with `TooManyKeys`. A requested id already in use fails with
    /// `DuplicateKeyId`. The new session has one reservation, is marked
    /// recently active, and has no key material.
    pub fn allocate(
        &mut self,
        peer: NodeId,
        requested: Option<KeyId>,
        bound: Option<ConnectionId>,
        rng: &mut dyn RandomSource,
    ) -> Result<SessionHandle> {
        if let Some(key_id) = requested {
            return match self.lookup(key_id, peer)? {
                Slot::Found(_) => Err(FabricError::DuplicateKeyId),
                Slot::Missing { free: Some(i) } => Ok(self.claim(i, peer, key_id, bound)),
                Slot::Missing { free: None } => Err(FabricError::TooManyKeys),
            };
        }

        let start = rng.next_u16()?;
        for offset in 0..=KeyId::MASK_NUMBER as u16 {
            let key_id = KeyId::make_session_key_id(start.wrapping_add(offset));
            match self.lookup(key_id, peer)? {
                Slot::Found(_) => continue,
                Slot::Missing { free: Some(i) } => return Ok(self.claim(i, peer, key_id, bound)),
                Slot::Missing { free: None } => return Err(FabricError::TooManyKeys),
            }
        }
        debug!(peer = %peer, "Every session key number is in use with peer");
        Err(FabricError::TooManyKeys)
    }

    fn claim(
        &mut self,
        index: usize,
        peer: NodeId,
        key_id: KeyId,
        bound: Option<ConnectionId>,
    ) -> SessionHandle {
        let entry = &mut self.entries[index];
        entry.init(peer, key_id, bound);
        entry.reserve_count = 1;
        entry.flags.recently_active = true;
        debug!(key_id = %key_id, peer = %peer, "Allocated session key");
        self.handle_at(index)
    }

    /// Install negotiated key material.
    ///
    /// The outbound counter restarts at a random non-zero value and the
    /// receive state is reset.
    pub fn set_key_material(
        &mut self,
        session: SessionHandle,
        enc_type: EncryptionType,
        auth_mode: AuthMode,
        key: &EncryptionKey,
        rng: &mut dyn RandomSource,
    ) -> Result<()> {
        if enc_type == EncryptionType::None {
            return Err(FabricError::UnsupportedEncryptionType);
        }
        let mut seed = rng.next_u32()?;
        while seed == 0 {
            seed = rng.next_u32()?;
        }

        let entry = self.get_mut(session)?;
        entry.next_msg_id.init(seed);
        entry.receive = ReceiveState::new();
        entry.msg_enc_key.enc_type = enc_type;
        entry.msg_enc_key.key = key.clone();
        entry.auth_mode = auth_mode;
        Ok(())
    }

    /// [`set_key_material`](Self::set_key_material) addressed by key id and peer.
    pub fn set_key_material_by_id(
        &mut self,
        key_id: KeyId,
        peer: NodeId,
        enc_type: EncryptionType,
        auth_mode: AuthMode,
        key: &EncryptionKey,
        rng: &mut dyn RandomSource,
    ) -> Result<()> {
        let session = self.find(key_id, peer)?;
        self.set_key_material(session, enc_type, auth_mode, key, rng)
    }

    /// Remove a session, wiping its key and notifying session-end subscribers.
    pub fn remove(&mut self, session: SessionHandle) -> Result<()> {
        self.get(session)?;
        self.remove_at(session.index(), false);
        Ok(())
    }

    pub fn remove_by_id(&mut self, key_id: KeyId, peer: NodeId) -> Result<()> {
        let session = self.find(key_id, peer)?;
        self.remove(session)
    }

    /// Free a slot that never held a live session, without notifying
    /// session-end subscribers.
    pub(crate) fn discard(&mut self, session: SessionHandle) -> Result<()> {
        self.get(session)?;
        self.free_slot(session.index());
        Ok(())
    }

    fn remove_at(&mut self, index: usize, idle: bool) {
        let entry = &self.entries[index];
        let (key_id, peer) = (entry.key_id(), entry.node_id);

        debug!(
            key_id = %key_id,
            peer = %peer,
            "Removing {}session key",
            if idle { "idle " } else { "" }
        );

        self.free_slot(index);

        for (_, callback) in self.subscribers.iter_mut() {
            callback(key_id, peer);
        }
    }

    fn free_slot(&mut self, index: usize) {
        let handle = self.handle_at(index);
        self.end_nodes.remove_session(handle);
        self.entries[index].clear();
    }

    /// Sweep idle sessions; returns true if some session may become idle later.
    ///
    /// Only unbound, key-set, remove-on-idle sessions with no reservations
    /// are candidates. Every pass clears the recently-active mark; a
    /// candidate is removed only when the mark was already clear, so a
    /// session survives the pass after its last activity.
    pub fn remove_idle(&mut self) -> bool {
        let mut more = false;
        for i in 0..self.entries.len() {
            let entry = &mut self.entries[i];
            if !entry.is_allocated() || !entry.is_key_set() {
                continue;
            }
            let was_active = std::mem::take(&mut entry.flags.recently_active);
            if entry.bound_connection.is_some() {
                continue;
            }
            if entry.flags.remove_on_idle && entry.reserve_count == 0 {
                if was_active {
                    more = true;
                } else {
                    self.remove_at(i, true);
                }
            }
        }
        more
    }

    /// Remove every session bound to `connection`; returns how many were removed.
    pub fn handle_connection_closed(&mut self, connection: ConnectionId) -> usize {
        let mut removed = 0;
        for i in 0..self.entries.len() {
            let entry = &self.entries[i];
            if entry.is_allocated() && entry.bound_connection == Some(connection) {
                self.remove_at(i, false);
                removed += 1;
            }
        }
        removed
    }

    /// Wipe every slot without notifying subscribers.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(SessionKeyEntry::clear);
        self.end_nodes.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reservations and flags
    // ─────────────────────────────────────────────────────────────────────────

    /// Hold the session against idle removal.
    pub fn reserve(&mut self, session: SessionHandle) -> Result<()> {
        let entry = self.get_mut(session)?;
        entry.reserve_count = entry.reserve_count.saturating_add(1);
        entry.flags.recently_active = true;
        Ok(())
    }

    /// Drop one reservation.
    ///
    /// A session whose last reservation is released before any key was set
    /// was never established and is removed.
    pub fn release(&mut self, session: SessionHandle) -> Result<()> {
        let entry = self.get_mut(session)?;
        entry.reserve_count = entry.reserve_count.saturating_sub(1);
        if entry.reserve_count == 0 && !entry.is_key_set() && !entry.is_suspended() {
            self.remove_at(session.index(), false);
        }
        Ok(())
    }

    pub fn mark_recently_active(&mut self, session: SessionHandle) -> Result<()> {
        self.get_mut(session)?.flags.recently_active = true;
        Ok(())
    }

    pub fn set_remove_on_idle(&mut self, session: SessionHandle, value: bool) -> Result<()> {
        self.get_mut(session)?.flags.remove_on_idle = value;
        Ok(())
    }

    pub fn set_locally_initiated(&mut self, session: SessionHandle, value: bool) -> Result<()> {
        self.get_mut(session)?.flags.locally_initiated = value;
        Ok(())
    }

    /// Mark a session shared; clearing the mark drops its end nodes.
    pub fn set_shared(&mut self, session: SessionHandle, value: bool) -> Result<()> {
        self.get_mut(session)?.flags.shared = value;
        if !value {
            self.end_nodes.remove_session(session);
        }
        Ok(())
    }

    pub(crate) fn mark_suspended(&mut self, session: SessionHandle) -> Result<()> {
        let entry = self.get_mut(session)?;
        entry.flags.suspended = true;
        entry.wipe_key();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shared sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// First key-set shared session terminating at `terminating_node` with
    /// the given auth mode and encryption type.
    pub fn find_shared_session(
        &self,
        terminating_node: NodeId,
        auth_mode: AuthMode,
        enc_type: EncryptionType,
    ) -> Option<SessionHandle> {
        self.iter()
            .find(|(_, e)| {
                e.is_key_set()
                    && e.is_shared()
                    && e.node_id == terminating_node
                    && e.auth_mode == auth_mode
                    && e.enc_type() == enc_type
            })
            .map(|(h, _)| h)
    }

    pub fn is_shared_session(&self, key_id: KeyId, peer: NodeId) -> bool {
        self.find(key_id, peer)
            .and_then(|h| self.get(h))
            .map_or(false, SessionKeyEntry::is_shared)
    }

    /// Register `end_node` as an alternate peer of a shared session.
    pub fn add_shared_session_end_node(
        &mut self,
        session: SessionHandle,
        end_node: NodeId,
    ) -> Result<()> {
        let terminating = self.get(session)?.node_id;
        self.end_nodes.add(session, terminating, end_node)
    }

    /// [`add_shared_session_end_node`](Self::add_shared_session_end_node)
    /// addressed by the session's terminating node and key id.
    pub fn add_shared_session_end_node_by_id(
        &mut self,
        end_node: NodeId,
        terminating_node: NodeId,
        key_id: KeyId,
    ) -> Result<()> {
        let session = self.find(key_id, terminating_node)?;
        self.add_shared_session_end_node(session, end_node)
    }

    pub fn shared_session_end_nodes(&self, session: SessionHandle) -> Result<Vec<NodeId>> {
        self.get(session)?;
        Ok(self.end_nodes.end_nodes(session).collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Message processing
    // ─────────────────────────────────────────────────────────────────────────

    /// State for a message exchanged with `peer` under session key `key_id`.
    ///
    /// The session must not be suspended, must use `enc_type`, and must be
    /// bound to `connection` if it is bound at all. Marks the session active.
    pub fn session_state(
        &mut self,
        key_id: KeyId,
        peer: NodeId,
        enc_type: EncryptionType,
        connection: Option<ConnectionId>,
    ) -> Result<SessionState<'_>> {
        let session = self.find(key_id, peer)?;
        let entry = self.get_mut(session)?;

        if entry.is_suspended() {
            return Err(FabricError::SessionKeySuspended);
        }
        if entry.enc_type() != enc_type {
            return Err(if entry.is_key_set() {
                FabricError::WrongEncryptionType
            } else {
                FabricError::KeyNotFound
            });
        }
        if entry.bound_connection.is_some() && entry.bound_connection != connection {
            return Err(FabricError::InvalidUseOfSessionKey);
        }

        entry.flags.recently_active = true;
        Ok(entry.state_view())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session-end subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn subscribe_session_end(&mut self, callback: SessionEndCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription = self.next_subscription.wrapping_add(1);
        self.subscribers.push((id, callback));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe_session_end(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(s, _)| *s != id);
        self.subscribers.len() != before
    }
}

impl std::fmt::Debug for SessionKeyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyTable")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated_count())
            .field("end_nodes", &self.end_nodes.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
