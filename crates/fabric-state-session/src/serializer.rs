//! Suspend and restore of session keys.
//!
//! A suspended session is written to a caller buffer and its key material is
//! wiped from the table; the entry stays allocated, flagged suspended, until
//! it is restored or removed. Buffers that fail to encode are zeroed before
//! the error is returned.

use fabric_state_core::{
    AuthMode, EncryptionKey, EncryptionType, FabricError, KeyId, NodeId, ReceiveState, Result,
    Tag, TagReader, TagWriter,
};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::entry::SessionHandle;
use crate::table::SessionKeyTable;

/// Structure tag of a serialized session.
pub const SESSION_STRUCTURE: u64 = 0x5345;

mod field {
    pub const KEY_ID: u64 = 1;
    pub const PEER_NODE_ID: u64 = 2;
    pub const NEXT_MESSAGE_ID: u64 = 3;
    pub const MAX_RECEIVED_MESSAGE_ID: u64 = 4;
    pub const RECEIVE_FLAGS: u64 = 5;
    pub const IS_LOCALLY_INITIATED: u64 = 6;
    pub const IS_SHARED: u64 = 7;
    pub const SHARED_SESSION_ALT_NODE_IDS: u64 = 8;
    pub const PEER_CERT_TYPE: u64 = 9;
    pub const ENCRYPTION_TYPE: u64 = 10;
    pub const DATA_KEY: u64 = 11;
    pub const INTEGRITY_KEY: u64 = 12;
}

/// Upper bound on the encoded size of a session with `end_nodes` alternate peers.
pub const fn max_suspended_len(end_nodes: usize) -> usize {
    94 + 9 * end_nodes
}

/// Durable fields of a session, decoded but not yet installed.
struct SuspendedSession {
    key_id: KeyId,
    peer: NodeId,
    next_msg_id: u32,
    receive: ReceiveState,
    locally_initiated: bool,
    end_nodes: Option<Vec<NodeId>>,
    cert_type: u8,
    enc_type: EncryptionType,
    key: EncryptionKey,
}

/// Serialize `session` into `buf`, then wipe its key and mark it suspended.
///
/// Returns the number of bytes written. On failure `buf` is zeroed and the
/// session is left untouched.
pub fn suspend(table: &mut SessionKeyTable, session: SessionHandle, buf: &mut [u8]) -> Result<usize> {
    match encode(table, session, buf) {
        Ok(len) => {
            table.mark_suspended(session)?;
            debug!(len, "Suspended session key");
            Ok(len)
        }
        Err(e) => {
            buf.zeroize();
            Err(e)
        }
    }
}

fn encode(table: &SessionKeyTable, session: SessionHandle, buf: &mut [u8]) -> Result<usize> {
    let entry = table.get(session)?;

    if entry.is_suspended() {
        return Err(FabricError::SessionKeySuspended);
    }
    if !entry.is_key_set() {
        return Err(FabricError::KeyNotFound);
    }
    if entry.bound_connection().is_some() {
        return Err(FabricError::InvalidUseOfSessionKey);
    }
    let cert_type = entry.auth_mode().cert_type().ok_or(FabricError::InvalidUseOfSessionKey)?;
    if entry.enc_type() != EncryptionType::Aes128CtrSha1 {
        return Err(FabricError::UnsupportedEncryptionType);
    }
    let key_id = entry.key_id().to_u16().ok_or(FabricError::InvalidKeyId)?;

    let end_nodes = table.shared_session_end_nodes(session)?;
    let shared = entry.is_shared();

    let mut w = TagWriter::new(buf);
    w.start_structure(Tag::Profile(SESSION_STRUCTURE), 11 + shared as usize)?;
    w.put_uint(Tag::Context(field::KEY_ID), key_id as u64)?;
    w.put_uint(Tag::Context(field::PEER_NODE_ID), entry.node_id().value())?;
    w.put_uint(Tag::Context(field::NEXT_MESSAGE_ID), entry.next_message_id() as u64)?;
    w.put_uint(
        Tag::Context(field::MAX_RECEIVED_MESSAGE_ID),
        entry.receive_state().max_received as u64,
    )?;
    w.put_uint(Tag::Context(field::RECEIVE_FLAGS), entry.receive_state().flags())?;
    w.put_bool(Tag::Context(field::IS_LOCALLY_INITIATED), entry.is_locally_initiated())?;
    w.put_bool(Tag::Context(field::IS_SHARED), shared)?;
    if shared {
        w.start_array(Tag::Context(field::SHARED_SESSION_ALT_NODE_IDS), end_nodes.len())?;
        for node in &end_nodes {
            w.put_uint(Tag::Anonymous, node.value())?;
        }
        w.end_container()?;
    }
    w.put_uint(Tag::Context(field::PEER_CERT_TYPE), cert_type as u64)?;
    w.put_uint(Tag::Context(field::ENCRYPTION_TYPE), entry.enc_type().to_u8() as u64)?;
    w.put_bytes(Tag::Context(field::DATA_KEY), entry.key().data_key())?;
    w.put_bytes(Tag::Context(field::INTEGRITY_KEY), entry.key().integrity_key())?;
    w.end_container()?;
    w.finish()
}

fn decode(buf: &[u8]) -> Result<SuspendedSession> {
    let mut r = TagReader::new(buf);
    r.enter_structure(Tag::Profile(SESSION_STRUCTURE))?;

    let key_id = KeyId::from(r.read_uint::<u16>(Tag::Context(field::KEY_ID))?);
    let peer = NodeId(r.read_uint(Tag::Context(field::PEER_NODE_ID))?);
    let next_msg_id = r.read_uint(Tag::Context(field::NEXT_MESSAGE_ID))?;
    let max_received = r.read_uint(Tag::Context(field::MAX_RECEIVED_MESSAGE_ID))?;
    let flags = r.read_uint(Tag::Context(field::RECEIVE_FLAGS))?;
    let receive = ReceiveState::from_flags(max_received, flags)
        .ok_or_else(|| FabricError::Decoding(format!("invalid receive flags 0x{:x}", flags)))?;
    let locally_initiated = r.read_bool(Tag::Context(field::IS_LOCALLY_INITIATED))?;

    let end_nodes = if r.read_bool(Tag::Context(field::IS_SHARED))? {
        let count = r.enter_array(Tag::Context(field::SHARED_SESSION_ALT_NODE_IDS))?;
        let mut nodes = Vec::new();
        for _ in 0..count {
            nodes.push(NodeId(r.read_uint(Tag::Anonymous)?));
        }
        r.exit_container()?;
        Some(nodes)
    } else {
        None
    };

    let cert_type = r.read_uint(Tag::Context(field::PEER_CERT_TYPE))?;
    let enc_type = match EncryptionType::from_u8(r.read_uint(Tag::Context(field::ENCRYPTION_TYPE))?) {
        Some(EncryptionType::Aes128CtrSha1) => EncryptionType::Aes128CtrSha1,
        _ => return Err(FabricError::UnsupportedEncryptionType),
    };
    let data_key = r.read_bytes(Tag::Context(field::DATA_KEY))?;
    let integrity_key = r.read_bytes(Tag::Context(field::INTEGRITY_KEY))?;
    let key = EncryptionKey::from_parts(data_key, integrity_key)?;

    r.exit_container()?;
    r.finish()?;

    Ok(SuspendedSession {
        key_id,
        peer,
        next_msg_id,
        receive,
        locally_initiated,
        end_nodes,
        cert_type,
        enc_type,
        key,
    })
}

/// Restore a session written by [`suspend`].
///
/// Reuses the suspended entry for the same key id and peer if one exists,
/// otherwise claims a free slot. A live session with the same key id and
/// peer is never overwritten. On failure no partially restored entry
/// remains in the table.
pub fn restore(table: &mut SessionKeyTable, buf: &[u8]) -> Result<SessionHandle> {
    let restored = decode(buf)?;

    let (session, created) = table.find_or_create(restored.key_id, restored.peer)?;
    if !created && !table.get(session)?.is_suspended() {
        warn!(
            key_id = %restored.key_id,
            peer = %restored.peer,
            "Refusing to restore over a live session key"
        );
        return Err(FabricError::DuplicateKeyId);
    }

    if let Err(e) = install(table, session, restored) {
        // A slot claimed here never held a live session.
        let cleanup = if created { table.discard(session) } else { table.remove(session) };
        debug_assert!(cleanup.is_ok(), "restored entry vanished before cleanup");
        return Err(e);
    }

    debug!("Restored session key");
    Ok(session)
}

fn install(table: &mut SessionKeyTable, session: SessionHandle, restored: SuspendedSession) -> Result<()> {
    table.set_shared(session, false)?;
    if let Some(nodes) = &restored.end_nodes {
        table.set_shared(session, true)?;
        for node in nodes {
            table.add_shared_session_end_node(session, *node)?;
        }
    }

    let entry = table.get_mut(session)?;
    entry.flags.suspended = false;
    entry.flags.remove_on_idle = true;
    entry.flags.recently_active = true;
    entry.flags.locally_initiated = restored.locally_initiated;
    entry.next_msg_id.init(restored.next_msg_id);
    entry.receive = restored.receive;
    entry.auth_mode = AuthMode::Case(restored.cert_type);
    entry.msg_enc_key.enc_type = restored.enc_type;
    entry.msg_enc_key.key = restored.key;
    Ok(())
}
