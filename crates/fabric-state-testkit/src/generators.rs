//! Proptest generators for property-based testing.

use proptest::prelude::*;

use fabric_state::core::{cert_type, ReceiveState, Tag, TagWriter};
use fabric_state::session::serializer::{max_suspended_len, SESSION_STRUCTURE};
use fabric_state::{EncryptionKey, EncryptionType, FabricError, KeyId, NodeId};

/// Generate a node id usable as a peer identity.
pub fn node_id() -> impl Strategy<Value = NodeId> {
    (1u64..u64::MAX).prop_map(NodeId)
}

/// Generate a session key id.
pub fn session_key_id() -> impl Strategy<Value = KeyId> {
    (0u16..=0x0FFF).prop_map(KeyId::make_session_key_id)
}

/// Generate non-zero AES-128-CTR/SHA-1 key material.
pub fn encryption_key() -> impl Strategy<Value = EncryptionKey> {
    prop::collection::vec(any::<u8>(), 36).prop_filter_map("all-zero key", |bytes| {
        let mut raw = [0u8; 36];
        raw.copy_from_slice(&bytes);
        let key = EncryptionKey::from_bytes(raw);
        (!key.is_zero()).then_some(key)
    })
}

/// Generate a certificate type a CASE peer may present.
pub fn peer_cert_type() -> impl Strategy<Value = u8> {
    prop_oneof![
        Just(cert_type::GENERAL),
        Just(cert_type::DEVICE),
        Just(cert_type::SERVICE_ENDPOINT),
        Just(cert_type::ACCESS_TOKEN),
    ]
}

/// Generate a receive state as it could be found in a session.
pub fn receive_state() -> impl Strategy<Value = ReceiveState> {
    (any::<u32>(), any::<u32>(), any::<bool>()).prop_map(|(max_received, window, synchronized)| {
        if synchronized {
            ReceiveState { max_received, window, synchronized }
        } else {
            ReceiveState::new()
        }
    })
}

/// Generate a run of message counters clustered around a random base.
///
/// Offsets stay well inside half the counter space, so every pair of
/// counters in a run orders the same way with and without wraparound.
pub fn counter_run(max_len: usize) -> impl Strategy<Value = (u32, Vec<u32>)> {
    (any::<u32>(), prop::collection::vec(0u32..160, 1..=max_len))
}

/// Parameters of a suspended session.
#[derive(Debug, Clone)]
pub struct SuspendedSessionParams {
    pub key_id: KeyId,
    pub peer: NodeId,
    pub next_msg_id: u32,
    pub receive: ReceiveState,
    pub locally_initiated: bool,
    /// Present for shared sessions.
    pub end_nodes: Option<Vec<NodeId>>,
    pub cert_type: u8,
    pub key: EncryptionKey,
}

impl Arbitrary for SuspendedSessionParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        let end_nodes = prop::option::of(prop::collection::btree_set(1u64..u64::MAX, 0..=3));
        (
            session_key_id(),
            node_id(),
            any::<u32>(),
            receive_state(),
            any::<bool>(),
            end_nodes,
            peer_cert_type(),
            encryption_key(),
        )
            .prop_filter("end node equals peer", |(_, peer, _, _, _, nodes, _, _)| {
                nodes.as_ref().map_or(true, |n| !n.contains(&peer.value()))
            })
            .prop_map(
                |(key_id, peer, next_msg_id, receive, locally_initiated, end_nodes, cert_type, key)| {
                    SuspendedSessionParams {
                        key_id,
                        peer,
                        next_msg_id,
                        receive,
                        locally_initiated,
                        end_nodes: end_nodes.map(|n| n.into_iter().map(NodeId).collect()),
                        cert_type,
                        key,
                    }
                },
            )
            .boxed()
    }
}

/// Encode `params` the way a suspended session is laid out on the wire.
///
/// Written field by field against the format rather than through the
/// session serializer, so it can serve as an independent reference.
pub fn encode_suspended_session(params: &SuspendedSessionParams) -> Vec<u8> {
    let end_node_count = params.end_nodes.as_ref().map_or(0, Vec::len);
    let mut buf = vec![0u8; max_suspended_len(end_node_count)];
    let mut w = TagWriter::new(&mut buf);
    write_session(&mut w, params).expect("suspended session fits its size bound");
    let len = w.finish().expect("structure closed");
    buf.truncate(len);
    buf
}

fn write_session(w: &mut TagWriter<'_>, params: &SuspendedSessionParams) -> fabric_state::Result<()> {
    let key_id = params.key_id.to_u16().ok_or(FabricError::InvalidKeyId)?;
    let fields = 11 + params.end_nodes.is_some() as usize;

    w.start_structure(Tag::Profile(SESSION_STRUCTURE), fields)?;
    w.put_uint(Tag::Context(1), key_id as u64)?;
    w.put_uint(Tag::Context(2), params.peer.value())?;
    w.put_uint(Tag::Context(3), params.next_msg_id as u64)?;
    w.put_uint(Tag::Context(4), params.receive.max_received as u64)?;
    w.put_uint(Tag::Context(5), params.receive.flags())?;
    w.put_bool(Tag::Context(6), params.locally_initiated)?;
    w.put_bool(Tag::Context(7), params.end_nodes.is_some())?;
    if let Some(nodes) = &params.end_nodes {
        w.start_array(Tag::Context(8), nodes.len())?;
        for node in nodes {
            w.put_uint(Tag::Anonymous, node.value())?;
        }
        w.end_container()?;
    }
    w.put_uint(Tag::Context(9), params.cert_type as u64)?;
    w.put_uint(Tag::Context(10), EncryptionType::Aes128CtrSha1.to_u8() as u64)?;
    w.put_bytes(Tag::Context(11), params.key.data_key())?;
    w.put_bytes(Tag::Context(12), params.key.integrity_key())?;
    w.end_container()
}
