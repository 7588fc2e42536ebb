//! Golden test vectors for deterministic verification.
//!
//! These vectors pin the exact bytes of suspended sessions and exported
//! fabric state, so a node can restore what a previous build wrote.

use fabric_state::core::crypto::aes128ctr_sha1;
use fabric_state::core::ReceiveState;
use fabric_state::keys::{decode_fabric_config, encode_fabric_config, FABRIC_CONFIG_LEN};
use fabric_state::session::{serializer, SessionKeyTable};
use fabric_state::{AuthMode, EncryptionKey, EncryptionType, FabricId, KeyId, NodeId};

/// A suspended session with its expected encoding.
#[derive(Debug, Clone)]
pub struct SessionVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub key_id: u16,
    pub peer: u64,
    pub next_msg_id: u32,
    pub max_received: u32,
    pub window: u32,
    pub synchronized: bool,
    pub locally_initiated: bool,
    /// End nodes of a shared session; `None` if not shared.
    pub end_nodes: Option<&'static [u64]>,
    pub cert_type: u8,
    /// Every data key byte holds this value.
    pub data_key_fill: u8,
    /// Every integrity key byte holds this value.
    pub integrity_key_fill: u8,
    /// Expected encoding (hex).
    pub encoded: &'static str,
}

impl SessionVector {
    pub fn key(&self) -> EncryptionKey {
        filled_key(self.data_key_fill, self.integrity_key_fill)
    }

    pub fn bytes(&self) -> Vec<u8> {
        hex::decode(self.encoded).expect("golden vector is valid hex")
    }

    pub fn receive_state(&self) -> ReceiveState {
        ReceiveState {
            max_received: self.max_received,
            window: self.window,
            synchronized: self.synchronized,
        }
    }
}

/// An exported fabric configuration with its expected encoding.
#[derive(Debug, Clone)]
pub struct FabricConfigVector {
    pub name: &'static str,
    pub fabric_id: u64,
    pub data_key_fill: u8,
    pub integrity_key_fill: u8,
    /// Expected encoding (hex).
    pub encoded: &'static str,
}

impl FabricConfigVector {
    pub fn fabric_secret(&self) -> EncryptionKey {
        filled_key(self.data_key_fill, self.integrity_key_fill)
    }

    pub fn bytes(&self) -> Vec<u8> {
        hex::decode(self.encoded).expect("golden vector is valid hex")
    }
}

fn filled_key(data: u8, integrity: u8) -> EncryptionKey {
    let mut bytes = [integrity; aes128ctr_sha1::KEY_SIZE];
    bytes[..aes128ctr_sha1::DATA_KEY_SIZE].fill(data);
    EncryptionKey::from_bytes(bytes)
}

/// Get all suspended session vectors.
pub fn session_vectors() -> Vec<SessionVector> {
    vec![
        SessionVector {
            name: "Locally initiated device session",
            key_id: 0x2A5C,
            peer: 0x18B4_3000_0000_0042,
            next_msg_id: 0x100,
            max_received: 0xFF,
            window: 0b11,
            synchronized: true,
            locally_initiated: true,
            end_nodes: None,
            cert_type: 0x02,
            data_key_fill: 0x11,
            integrity_key_fill: 0x22,
            encoded: concat!(
                "d95345ab01192a5c021b18b4300000000042031901000418ff051b0000000100000003",
                "06f507f409020a01",
                "0b5011111111111111111111111111111111",
                "0c542222222222222222222222222222222222222222",
            ),
        },
        SessionVector {
            name: "Shared service session with two end nodes",
            key_id: 0x2001,
            peer: 0x18B4_3000_0000_0001,
            next_msg_id: 1,
            max_received: 0,
            window: 0,
            synchronized: false,
            locally_initiated: false,
            end_nodes: Some(&[0x18B4_3000_0000_00A1, 0x18B4_3000_0000_00A2]),
            cert_type: 0x03,
            data_key_fill: 0xAA,
            integrity_key_fill: 0xBB,
            encoded: concat!(
                "d95345ac01192001021b18b4300000000001030104000500",
                "06f407f508821b18b43000000000a11b18b43000000000a209030a01",
                "0b50aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "0c54bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            ),
        },
        SessionVector {
            name: "Counters at the top of the range",
            key_id: 0x2FFF,
            peer: 2,
            next_msg_id: u32::MAX,
            max_received: 0xFFFF_FFF0,
            window: 0x8000_0001,
            synchronized: true,
            locally_initiated: false,
            end_nodes: None,
            cert_type: 0x01,
            data_key_fill: 0x5A,
            integrity_key_fill: 0xA5,
            encoded: concat!(
                "d95345ab01192fff0202031affffffff041afffffff0051b0000000180000001",
                "06f407f409010a01",
                "0b505a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a",
                "0c54a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5",
            ),
        },
    ]
}

/// Get all fabric configuration vectors.
pub fn fabric_config_vectors() -> Vec<FabricConfigVector> {
    vec![FabricConfigVector {
        name: "Fabric with a 48-bit id",
        fabric_id: 0x0000_1234_5678_9ABC,
        data_key_fill: 0xD1,
        integrity_key_fill: 0x15,
        encoded: concat!(
            "d94643a2011b0000123456789abc0281a601191001020103",
            "50d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1",
            "04541515151515151515151515151515151515151515",
            "05000600",
        ),
    }]
}

/// Restore `vector` into a fresh table, check every field, suspend it again
/// and compare the bytes.
pub fn verify_session_vector(vector: &SessionVector) -> Result<(), String> {
    let fail = |what: &str| format!("{}: {}", vector.name, what);
    let encoded = vector.bytes();
    let end_nodes: Vec<NodeId> = vector.end_nodes.unwrap_or(&[]).iter().copied().map(NodeId).collect();

    let mut table = SessionKeyTable::new(4, 8, 4);
    let session = serializer::restore(&mut table, &encoded).map_err(|e| fail(&format!("restore: {e}")))?;

    let entry = table.get(session).map_err(|e| fail(&e.to_string()))?;
    let checks = [
        ("key id", entry.key_id() == KeyId::from(vector.key_id)),
        ("peer", entry.node_id() == NodeId(vector.peer)),
        ("next message id", entry.next_message_id() == vector.next_msg_id),
        ("receive state", *entry.receive_state() == vector.receive_state()),
        ("locally initiated", entry.is_locally_initiated() == vector.locally_initiated),
        ("shared", entry.is_shared() == vector.end_nodes.is_some()),
        ("auth mode", entry.auth_mode() == AuthMode::Case(vector.cert_type)),
        ("encryption type", entry.enc_type() == EncryptionType::Aes128CtrSha1),
        ("key", *entry.key() == vector.key()),
    ];
    if let Some((field, _)) = checks.iter().find(|(_, ok)| !ok) {
        return Err(fail(&format!("{field} mismatch")));
    }
    if table.shared_session_end_nodes(session).map_err(|e| fail(&e.to_string()))? != end_nodes {
        return Err(fail("end nodes mismatch"));
    }

    let mut buf = vec![0u8; serializer::max_suspended_len(end_nodes.len())];
    let len = serializer::suspend(&mut table, session, &mut buf).map_err(|e| fail(&format!("suspend: {e}")))?;
    if buf[..len] != encoded[..] {
        return Err(fail(&format!("re-encoded as {}", hex::encode(&buf[..len]))));
    }
    Ok(())
}

/// Encode and decode `vector`, comparing against the expected bytes.
pub fn verify_fabric_config_vector(vector: &FabricConfigVector) -> Result<(), String> {
    let fail = |what: String| format!("{}: {}", vector.name, what);
    let fabric_id = FabricId(vector.fabric_id);

    let mut buf = [0u8; FABRIC_CONFIG_LEN];
    let len = encode_fabric_config(fabric_id, &vector.fabric_secret(), &mut buf)
        .map_err(|e| fail(format!("encode: {e}")))?;
    if hex::encode(&buf[..len]) != vector.encoded {
        return Err(fail(format!("encoded as {}", hex::encode(&buf[..len]))));
    }

    let decoded = decode_fabric_config(&vector.bytes()).map_err(|e| fail(format!("decode: {e}")))?;
    if decoded.fabric_id != fabric_id || decoded.fabric_secret != vector.fabric_secret() {
        return Err(fail("decoded fields mismatch".to_string()));
    }
    Ok(())
}

/// Verify every golden vector.
pub fn verify_all_vectors() -> Result<(), String> {
    for vector in session_vectors() {
        verify_session_vector(&vector)?;
    }
    for vector in fabric_config_vectors() {
        verify_fabric_config_vector(&vector)?;
    }
    Ok(())
}
