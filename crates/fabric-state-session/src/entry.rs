//! Session key entries and the handles that name them.

use fabric_state_core::{
    AuthMode, ConnectionId, EncryptionKey, EncryptionType, KeyId, MessageCounter,
    MessageEncryptionKey, MonotonicCounter, NodeId, ReceiveState, SessionState,
};
use zeroize::Zeroize;

/// Stable reference to a session table slot.
///
/// The generation changes every time the slot is freed, so a handle kept
/// past its session's removal no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub(crate) index: u16,
    pub(crate) generation: u32,
}

impl SessionHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Independent per-session flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    pub locally_initiated: bool,
    pub shared: bool,
    pub remove_on_idle: bool,
    pub recently_active: bool,
    pub suspended: bool,
}

/// One slot of the session key table.
///
/// A slot is allocated while its key id is not [`KeyId::NONE`], and its key
/// is set while the encryption type is not [`EncryptionType::None`].
#[derive(Debug, Default)]
pub struct SessionKeyEntry {
    pub(crate) node_id: NodeId,
    pub(crate) msg_enc_key: MessageEncryptionKey,
    pub(crate) next_msg_id: MonotonicCounter,
    pub(crate) receive: ReceiveState,
    pub(crate) bound_connection: Option<ConnectionId>,
    pub(crate) auth_mode: AuthMode,
    pub(crate) reserve_count: u8,
    pub(crate) flags: SessionFlags,
    pub(crate) generation: u32,
}

impl SessionKeyEntry {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn key_id(&self) -> KeyId {
        self.msg_enc_key.key_id
    }

    pub fn enc_type(&self) -> EncryptionType {
        self.msg_enc_key.enc_type
    }

    pub fn msg_enc_key(&self) -> &MessageEncryptionKey {
        &self.msg_enc_key
    }

    pub fn key(&self) -> &EncryptionKey {
        &self.msg_enc_key.key
    }

    /// Next outbound message id.
    pub fn next_message_id(&self) -> u32 {
        self.next_msg_id.value()
    }

    pub fn receive_state(&self) -> &ReceiveState {
        &self.receive
    }

    pub fn bound_connection(&self) -> Option<ConnectionId> {
        self.bound_connection
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn reserve_count(&self) -> u8 {
        self.reserve_count
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn is_allocated(&self) -> bool {
        self.msg_enc_key.key_id != KeyId::NONE
    }

    pub fn is_key_set(&self) -> bool {
        self.msg_enc_key.is_key_set()
    }

    pub fn is_suspended(&self) -> bool {
        self.flags.suspended
    }

    pub fn is_shared(&self) -> bool {
        self.flags.shared
    }

    pub fn is_locally_initiated(&self) -> bool {
        self.flags.locally_initiated
    }

    pub fn is_remove_on_idle(&self) -> bool {
        self.flags.remove_on_idle
    }

    pub fn is_recently_active(&self) -> bool {
        self.flags.recently_active
    }

    /// Claim a free slot for `peer` with no key material yet.
    pub(crate) fn init(&mut self, peer: NodeId, key_id: KeyId, bound: Option<ConnectionId>) {
        self.node_id = peer;
        self.msg_enc_key.key_id = key_id;
        self.msg_enc_key.enc_type = EncryptionType::None;
        self.msg_enc_key.key.zeroize();
        self.next_msg_id.init(u32::MAX);
        self.receive = ReceiveState { max_received: u32::MAX, window: 0, synchronized: false };
        self.bound_connection = bound;
        self.auth_mode = AuthMode::NotSpecified;
        self.reserve_count = 0;
        self.flags = SessionFlags::default();
    }

    /// Drop the key bytes while keeping the slot allocated.
    pub(crate) fn wipe_key(&mut self) {
        self.msg_enc_key.enc_type = EncryptionType::None;
        self.msg_enc_key.key.zeroize();
    }

    /// Free the slot, wiping key material and retiring outstanding handles.
    pub(crate) fn clear(&mut self) {
        let generation = self.generation.wrapping_add(1);
        self.msg_enc_key.clear();
        *self = Self { generation, ..Self::default() };
    }

    pub(crate) fn state_view(&mut self) -> SessionState<'_> {
        let Self { msg_enc_key, next_msg_id, receive, auth_mode, .. } = self;
        SessionState::new(Some(&*msg_enc_key), *auth_mode, next_msg_id, Some(receive))
    }
}
