//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use fabric_state::core::{cert_type, MemoryCounterStorage, SeededRandom};
use fabric_state::keys::{GroupKey, GroupKeyStore, MemoryKeyStore};
use fabric_state::sync::ManualTimer;
use fabric_state::{
    AuthMode, ConnectionId, EncryptionKey, EncryptionType, FabricState, FabricStateConfig, KeyId,
    NodeId, SessionHandle, FABRIC_SECRET_SIZE,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// A peer the fixtures talk to.
pub const PEER: NodeId = NodeId(0x18B4_3000_0000_0042);

/// Deterministic session key material for `seed`.
pub fn session_key(seed: u64) -> EncryptionKey {
    let mut bytes = [0u8; FABRIC_SECRET_SIZE];
    StdRng::seed_from_u64(seed).fill_bytes(&mut bytes);
    EncryptionKey::from_bytes(bytes)
}

/// An initialized node with in-memory key and counter storage.
pub struct NodeFixture {
    pub state: FabricState,
    seed: u64,
}

impl NodeFixture {
    /// Create a node with the default configuration.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create with a deterministic random source.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_config(FabricStateConfig::default(), seed)
    }

    pub fn with_config(config: FabricStateConfig, seed: u64) -> Self {
        let mut state = FabricState::new(
            config,
            MemoryKeyStore::new(),
            ManualTimer::new(),
            SeededRandom::new(seed),
        )
        .expect("fixture config is valid");
        state
            .init(Box::new(MemoryCounterStorage::new()))
            .expect("fresh state initializes");
        Self { state, seed }
    }

    /// Allocate a CASE session with `peer` and install key material.
    pub fn establish_session(
        &mut self,
        peer: NodeId,
        bound: Option<ConnectionId>,
    ) -> (SessionHandle, KeyId) {
        let session = self
            .state
            .alloc_session_key(peer, None, bound)
            .expect("session slot available");
        self.state
            .set_session_key(
                session,
                EncryptionType::Aes128CtrSha1,
                AuthMode::Case(cert_type::DEVICE),
                &session_key(self.seed ^ peer.value()),
            )
            .expect("key material accepted");
        let key_id = self.state.sessions().get(session).expect("session exists").key_id();
        (session, key_id)
    }

    /// Provision an application group and return its static message key id.
    ///
    /// Creates a fabric first if the node is not a member of one.
    pub fn provision_app_group(&mut self, global_id: u32, local_number: u8) -> KeyId {
        if !self.state.is_fabric_member() {
            self.state.create_fabric().expect("fabric created");
        }
        let master = GroupKey::new(
            KeyId::make_group_master_key_id(local_number),
            &session_key(u64::from(global_id)).as_bytes()[..32],
        )
        .expect("valid master key")
        .with_app_group_global_id(global_id);
        self.state
            .key_store_mut()
            .store_group_key(master)
            .expect("master key stored");
        self.state
            .msg_enc_key_id_for_app_group(global_id, KeyId::FABRIC_ROOT_KEY, false)
            .expect("group key id")
    }

    /// Run a counter sync round in which `peer` answers with its counter
    /// `peer_msg_id`. Returns whether the peer became synchronized.
    pub fn sync_group_peer(&mut self, peer: NodeId, key_id: KeyId, peer_msg_id: u32) -> bool {
        let request = self
            .state
            .get_session_state(peer, key_id, EncryptionType::Aes128CtrSha1, None)
            .and_then(|mut s| s.new_message_id())
            .expect("group key usable");
        self.state
            .on_msg_counter_sync_req_sent(request)
            .expect("request recorded");
        self.state
            .on_msg_counter_sync_resp_rcvd(peer, peer_msg_id, request)
            .expect("response handled")
    }
}

impl Default for NodeFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Two nodes in the same fabric: the first created it, the second joined
/// from its export.
pub fn joined_pair(seed: u64) -> (NodeFixture, NodeFixture) {
    let mut creator = NodeFixture::with_seed(seed);
    creator.state.set_local_node_id(NodeId(0x18B4_3000_0000_0001));
    creator.state.create_fabric().expect("fabric created");

    let mut buf = [0u8; fabric_state::keys::FABRIC_CONFIG_LEN];
    let len = creator.state.export_fabric_state(&mut buf).expect("fabric exported");

    let mut joiner = NodeFixture::with_seed(seed.wrapping_add(1));
    joiner.state.set_local_node_id(NodeId(0x18B4_3000_0000_0002));
    joiner.state.join_existing_fabric(&buf[..len]).expect("fabric joined");
    (creator, joiner)
}
