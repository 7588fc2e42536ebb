//! The fabric state: one node's fabric membership, sessions and counters.
//!
//! [`FabricState`] brings the session table, peer cache, application key
//! cache and counter sync together behind the calls the message layer makes
//! for every inbound and outbound message.

use std::net::Ipv6Addr;

use fabric_state_core::address::{self, interface_id, interface_id_to_node_id};
use fabric_state_core::crypto::aes128ctr_sha1;
use fabric_state_core::{
    AuthMode, ConnectionId, CounterStorage, EncryptionKey, EncryptionType, FabricError, FabricId,
    KeyId, KeyType, MessageCounter, MonotonicCounter, NodeId, PersistedCounter, RandomSource,
    Result, SessionState,
};
use fabric_state_keys::{
    check_msg_enc_for_app_group, decode_fabric_config, derive_msg_enc_app_key, encode_fabric_config,
    msg_enc_key_id_for_app_group, AppKeyCache, GroupKey, GroupKeyStore, MemoryKeyStore,
};
use fabric_state_session::{
    serializer, SessionEndCallback, SessionHandle, SessionKeyTable, SubscriptionId,
};
use fabric_state_sync::{
    ActivityChange, CounterSyncCoordinator, ManualTimer, PeerStateCache, TimerEvent, TimerService,
};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::FabricStateConfig;
use crate::error::ConfigError;

/// Size of a fabric secret in bytes.
pub const FABRIC_SECRET_SIZE: usize = aes128ctr_sha1::KEY_SIZE;

/// Receives fabric state events. Every method defaults to doing nothing.
pub trait FabricStateDelegate {
    fn did_join_fabric(&mut self, _fabric_id: FabricId) {}

    fn did_leave_fabric(&mut self, _fabric_id: FabricId) {}

    /// Counter sync started (`true`) or ended (`false`); sleepy nodes poll
    /// faster while it runs.
    fn network_activity_changed(&mut self, _increased: bool) {}

    fn msg_counter_synchronized(&mut self, _peer: NodeId) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotInitialized,
    Initialized,
}

/// Fabric and session state of a node.
///
/// Owned by a single event loop; nothing here locks.
pub struct FabricState<K = MemoryKeyStore, T = ManualTimer> {
    config: FabricStateConfig,
    phase: Phase,
    fabric_id: FabricId,
    local_node_id: NodeId,
    default_subnet: u16,

    key_store: K,
    timer: T,
    rng: Box<dyn RandomSource>,
    delegate: Option<Box<dyn FabricStateDelegate>>,

    sessions: SessionKeyTable,
    peers: PeerStateCache,
    app_keys: AppKeyCache,
    counter_sync: CounterSyncCoordinator,

    next_unenc_udp_msg_id: MonotonicCounter,
    next_unenc_tcp_msg_id: MonotonicCounter,
    next_group_key_msg_id: Option<PersistedCounter>,
}

impl<K: GroupKeyStore, T: TimerService> FabricState<K, T> {
    /// Create an uninitialized fabric state sized by `config`.
    pub fn new(
        config: FabricStateConfig,
        key_store: K,
        timer: T,
        rng: impl RandomSource + 'static,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            phase: Phase::NotInitialized,
            fabric_id: FabricId::NOT_SPECIFIED,
            local_node_id: NodeId(config.local_node_id),
            default_subnet: config.default_subnet,
            key_store,
            timer,
            rng: Box::new(rng),
            delegate: None,
            sessions: SessionKeyTable::new(
                config.max_session_keys,
                config.max_shared_session_end_nodes,
                config.max_end_nodes_per_shared_session,
            ),
            peers: PeerStateCache::new(config.max_peer_nodes),
            app_keys: AppKeyCache::new(config.max_cached_app_keys),
            counter_sync: CounterSyncCoordinator::new(config.msg_counter_sync_resp_timeout()),
            next_unenc_udp_msg_id: MonotonicCounter::new(0),
            next_unenc_tcp_msg_id: MonotonicCounter::new(0),
            next_group_key_msg_id: None,
            config,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start operating. `counter_storage` persists the group-key message counter.
    pub fn init(&mut self, counter_storage: Box<dyn CounterStorage>) -> Result<()> {
        if self.phase != Phase::NotInitialized {
            return Err(FabricError::IncorrectState);
        }

        let group_counter = PersistedCounter::init(counter_storage, self.config.group_key_msg_counter_epoch)?;
        self.next_unenc_udp_msg_id.init(self.rng.next_u32()?);
        self.next_unenc_tcp_msg_id.init(0);
        self.next_group_key_msg_id = Some(group_counter);

        self.fabric_id = FabricId::NOT_SPECIFIED;
        self.reset_transient_state();
        self.phase = Phase::Initialized;
        debug!(node = %self.local_node_id, "Fabric state initialized");
        Ok(())
    }

    /// Stop operating, wiping all session and cached key material.
    pub fn shutdown(&mut self) {
        self.reset_transient_state();
        self.next_group_key_msg_id = None;
        self.phase = Phase::NotInitialized;
        debug!("Fabric state shut down");
    }

    fn reset_transient_state(&mut self) {
        self.counter_sync.reset(&mut self.timer);
        self.sessions.clear();
        self.peers.clear();
        self.app_keys.clear();
    }

    fn ensure_initialized(&self) -> Result<()> {
        match self.phase {
            Phase::Initialized => Ok(()),
            Phase::NotInitialized => Err(FabricError::IncorrectState),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &FabricStateConfig {
        &self.config
    }

    pub fn set_delegate(&mut self, delegate: Box<dyn FabricStateDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn clear_delegate(&mut self) {
        self.delegate = None;
    }

    pub fn key_store(&self) -> &K {
        &self.key_store
    }

    /// The key store, for provisioning group keys.
    pub fn key_store_mut(&mut self) -> &mut K {
        &mut self.key_store
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    pub fn set_local_node_id(&mut self, node: NodeId) {
        self.local_node_id = node;
    }

    pub fn default_subnet(&self) -> u16 {
        self.default_subnet
    }

    pub fn set_default_subnet(&mut self, subnet: u16) {
        self.default_subnet = subnet;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fabric membership
    // ─────────────────────────────────────────────────────────────────────────

    /// The current fabric, `FabricId::NOT_SPECIFIED` when not a member.
    pub fn fabric_id(&self) -> FabricId {
        self.fabric_id
    }

    pub fn is_fabric_member(&self) -> bool {
        self.fabric_id.is_specified()
    }

    /// Create a new fabric with a random id and a fresh fabric secret.
    pub fn create_fabric(&mut self) -> Result<FabricId> {
        self.ensure_initialized()?;
        if self.is_fabric_member() {
            return Err(FabricError::IncorrectState);
        }
        self.clear_fabric_state()?;

        let fabric_id = match self.provision_new_fabric() {
            Ok(fabric_id) => fabric_id,
            Err(e) => {
                warn!(error = %e, "Failed to create fabric");
                self.clear_fabric_state()?;
                return Err(e);
            }
        };

        self.fabric_id = fabric_id;
        info!(fabric = %fabric_id, "Created fabric");
        if let Some(delegate) = self.delegate.as_mut() {
            delegate.did_join_fabric(fabric_id);
        }
        Ok(fabric_id)
    }

    fn provision_new_fabric(&mut self) -> Result<FabricId> {
        let fabric_id = loop {
            let candidate = self.rng.next_u64()?;
            if FabricId::is_assignable(candidate) {
                break FabricId(candidate);
            }
        };

        let mut secret = Zeroizing::new([0u8; FABRIC_SECRET_SIZE]);
        self.rng.fill_bytes(&mut secret[..])?;
        self.key_store.store_group_key(GroupKey::new(KeyId::FABRIC_SECRET, &secret[..])?)?;
        Ok(fabric_id)
    }

    /// Join the fabric described by an encoded fabric configuration.
    pub fn join_existing_fabric(&mut self, fabric_config: &[u8]) -> Result<()> {
        self.ensure_initialized()?;
        if self.is_fabric_member() {
            return Err(FabricError::IncorrectState);
        }
        self.clear_fabric_state()?;

        let joined = decode_fabric_config(fabric_config).and_then(|config| {
            if !FabricId::is_assignable(config.fabric_id.value()) {
                return Err(FabricError::InvalidArgument);
            }
            let secret = GroupKey::new(KeyId::FABRIC_SECRET, config.fabric_secret.as_bytes())?;
            self.key_store.store_group_key(secret)?;
            Ok(config.fabric_id)
        });
        let fabric_id = match joined {
            Ok(fabric_id) => fabric_id,
            Err(e) => {
                warn!(error = %e, "Failed to join fabric");
                self.clear_fabric_state()?;
                return Err(e);
            }
        };

        self.fabric_id = fabric_id;
        info!(fabric = %fabric_id, "Joined fabric");
        if let Some(delegate) = self.delegate.as_mut() {
            delegate.did_join_fabric(fabric_id);
        }
        Ok(())
    }

    /// Encode the fabric id and secret for a node about to join. Returns the
    /// number of bytes written; on failure `buf` is zeroed.
    pub fn export_fabric_state(&self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_initialized()?;
        if !self.is_fabric_member() {
            return Err(FabricError::IncorrectState);
        }

        let secret = self.key_store.retrieve_group_key(KeyId::FABRIC_SECRET)?;
        if secret.secret().len() != FABRIC_SECRET_SIZE {
            return Err(FabricError::KeyStore(format!(
                "fabric secret is {} bytes",
                secret.secret().len()
            )));
        }
        let (data_key, integrity_key) = secret.secret().split_at(aes128ctr_sha1::DATA_KEY_SIZE);
        let fabric_secret = EncryptionKey::from_parts(data_key, integrity_key)?;
        encode_fabric_config(self.fabric_id, &fabric_secret, buf)
    }

    /// Leave the current fabric, clearing the key store.
    pub fn leave_fabric(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.clear_fabric_state()
    }

    fn clear_fabric_state(&mut self) -> Result<()> {
        let old = std::mem::replace(&mut self.fabric_id, FabricId::NOT_SPECIFIED);
        self.app_keys.clear();
        let cleared = self.key_store.clear();

        if old.is_specified() {
            info!(fabric = %old, "Left fabric");
            if let Some(delegate) = self.delegate.as_mut() {
                delegate.did_leave_fabric(old);
            }
        }
        cleared.map_err(Into::into)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn sessions(&self) -> &SessionKeyTable {
        &self.sessions
    }

    /// Allocate a session with `peer`, drawing a random key id unless one is requested.
    pub fn alloc_session_key(
        &mut self,
        peer: NodeId,
        requested: Option<KeyId>,
        bound: Option<ConnectionId>,
    ) -> Result<SessionHandle> {
        self.ensure_initialized()?;
        self.sessions.allocate(peer, requested, bound, self.rng.as_mut())
    }

    pub fn set_session_key(
        &mut self,
        session: SessionHandle,
        enc_type: EncryptionType,
        auth_mode: AuthMode,
        key: &EncryptionKey,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions.set_key_material(session, enc_type, auth_mode, key, self.rng.as_mut())
    }

    pub fn set_session_key_by_id(
        &mut self,
        key_id: KeyId,
        peer: NodeId,
        enc_type: EncryptionType,
        auth_mode: AuthMode,
        key: &EncryptionKey,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions
            .set_key_material_by_id(key_id, peer, enc_type, auth_mode, key, self.rng.as_mut())
    }

    /// Find a session, optionally claiming a blank slot for it.
    pub fn find_session_key(&mut self, key_id: KeyId, peer: NodeId, create: bool) -> Result<SessionHandle> {
        self.ensure_initialized()?;
        if create {
            self.sessions.find_or_create(key_id, peer).map(|(session, _)| session)
        } else {
            self.sessions.find(key_id, peer)
        }
    }

    pub fn remove_session_key(&mut self, session: SessionHandle) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions.remove(session)
    }

    pub fn remove_session_key_by_id(&mut self, key_id: KeyId, peer: NodeId) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions.remove_by_id(key_id, peer)
    }

    pub fn reserve_session_key(&mut self, session: SessionHandle) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions.reserve(session)
    }

    pub fn release_session_key(&mut self, session: SessionHandle) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions.release(session)
    }

    pub fn set_remove_on_idle(&mut self, session: SessionHandle, value: bool) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions.set_remove_on_idle(session, value)
    }

    pub fn set_locally_initiated(&mut self, session: SessionHandle, value: bool) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions.set_locally_initiated(session, value)
    }

    /// Mark a session shared between end nodes behind its peer.
    pub fn set_shared_session(&mut self, session: SessionHandle, value: bool) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions.set_shared(session, value)
    }

    /// Sweep idle sessions; returns true if another sweep may remove more.
    pub fn remove_idle_session_keys(&mut self) -> bool {
        self.phase == Phase::Initialized && self.sessions.remove_idle()
    }

    /// Remove every session bound to a closed connection.
    pub fn handle_connection_closed(&mut self, connection: ConnectionId) -> usize {
        if self.phase != Phase::Initialized {
            return 0;
        }
        self.sessions.handle_connection_closed(connection)
    }

    /// Suspend a session into `buf`; see [`serializer::suspend`].
    pub fn suspend_session(&mut self, key_id: KeyId, peer: NodeId, buf: &mut [u8]) -> Result<usize> {
        self.ensure_initialized()?;
        let session = self.sessions.find(key_id, peer)?;
        serializer::suspend(&mut self.sessions, session, buf)
    }

    /// Restore a suspended session; see [`serializer::restore`].
    pub fn restore_session(&mut self, buf: &[u8]) -> Result<SessionHandle> {
        self.ensure_initialized()?;
        serializer::restore(&mut self.sessions, buf)
    }

    // Shared sessions

    pub fn find_shared_session(
        &self,
        terminating_node: NodeId,
        auth_mode: AuthMode,
        enc_type: EncryptionType,
    ) -> Option<SessionHandle> {
        self.sessions.find_shared_session(terminating_node, auth_mode, enc_type)
    }

    pub fn is_shared_session(&self, key_id: KeyId, peer: NodeId) -> bool {
        self.sessions.is_shared_session(key_id, peer)
    }

    pub fn add_shared_session_end_node(
        &mut self,
        end_node: NodeId,
        terminating_node: NodeId,
        key_id: KeyId,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.sessions.add_shared_session_end_node_by_id(end_node, terminating_node, key_id)
    }

    pub fn shared_session_end_nodes(&self, session: SessionHandle) -> Result<Vec<NodeId>> {
        self.sessions.shared_session_end_nodes(session)
    }

    pub fn subscribe_session_end(&mut self, callback: SessionEndCallback) -> SubscriptionId {
        self.sessions.subscribe_session_end(callback)
    }

    pub fn unsubscribe_session_end(&mut self, id: SubscriptionId) -> bool {
        self.sessions.unsubscribe_session_end(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Message processing
    // ─────────────────────────────────────────────────────────────────────────

    /// State governing one message exchanged with `peer` under `key_id`.
    ///
    /// Unencrypted messages over a connection have no receive state; without
    /// a connection they are screened against the peer cache. Group-keyed
    /// messages from a peer with no cache entry are treated as duplicates
    /// until its counter is synchronized.
    pub fn get_session_state(
        &mut self,
        peer: NodeId,
        key_id: KeyId,
        enc_type: EncryptionType,
        connection: Option<ConnectionId>,
    ) -> Result<SessionState<'_>> {
        self.ensure_initialized()?;

        match key_id.key_type() {
            Some(KeyType::None) => {
                if key_id != KeyId::NONE {
                    return Err(FabricError::InvalidKeyId);
                }
                if enc_type != EncryptionType::None {
                    return Err(FabricError::WrongEncryptionType);
                }
                Ok(match connection {
                    None => {
                        let entry = self.peers.find_or_alloc(peer);
                        SessionState::new(
                            None,
                            AuthMode::Unauthenticated,
                            &mut self.next_unenc_udp_msg_id,
                            Some(&mut entry.unencrypted),
                        )
                    }
                    Some(_) => SessionState::new(
                        None,
                        AuthMode::Unauthenticated,
                        &mut self.next_unenc_tcp_msg_id,
                        None,
                    ),
                })
            }
            Some(KeyType::Session) => self.sessions.session_state(key_id, peer, enc_type, connection),
            Some(KeyType::AppStatic | KeyType::AppRotating) => {
                let Self { app_keys, key_store, peers, next_group_key_msg_id, .. } = self;
                let counter = next_group_key_msg_id.as_mut().ok_or(FabricError::IncorrectState)?;
                let key = app_keys.get_or_derive(key_id, enc_type, |out| {
                    derive_msg_enc_app_key(&*key_store, key_id, enc_type, out).map(|_| ())
                })?;
                let receive = peers.find(peer).map(|entry| &mut entry.group_key);
                Ok(SessionState::new(Some(key), AuthMode::group_key(key_id), counter, receive))
            }
            _ => Err(FabricError::UnknownKeyType),
        }
    }

    /// Next group-key message counter value, without consuming it.
    pub fn next_group_key_msg_id(&self) -> Result<u32> {
        self.next_group_key_msg_id
            .as_ref()
            .map(MessageCounter::value)
            .ok_or(FabricError::IncorrectState)
    }

    pub fn peer_states(&self) -> &PeerStateCache {
        &self.peers
    }

    pub fn app_key_cache(&self) -> &AppKeyCache {
        &self.app_keys
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Message counter sync
    // ─────────────────────────────────────────────────────────────────────────

    pub fn counter_sync(&self) -> &CounterSyncCoordinator {
        &self.counter_sync
    }

    /// Record that a counter sync request went out with group-key counter `msg_id`.
    pub fn on_msg_counter_sync_req_sent(&mut self, msg_id: u32) -> Result<()> {
        self.ensure_initialized()?;
        let change = self.counter_sync.on_request_sent(msg_id, &mut self.timer)?;
        self.signal_activity(change);
        Ok(())
    }

    /// Handle a counter sync response from `peer`. Returns true if the
    /// peer's group-key counter became synchronized.
    pub fn on_msg_counter_sync_resp_rcvd(&mut self, peer: NodeId, peer_msg_id: u32, requestor: u32) -> Result<bool> {
        let current = self.next_group_key_msg_id()?;
        let synchronized = self
            .counter_sync
            .on_response(&mut self.peers, peer, peer_msg_id, requestor, current);
        if synchronized {
            if let Some(delegate) = self.delegate.as_mut() {
                delegate.msg_counter_synchronized(peer);
            }
        }
        Ok(synchronized)
    }

    /// Handle an expired timer delivered by the timer service.
    pub fn handle_timer_event(&mut self, event: TimerEvent) -> Result<()> {
        self.ensure_initialized()?;
        match event {
            TimerEvent::MsgCounterSyncTimeout => {
                let current = self.next_group_key_msg_id()?;
                let change = self.counter_sync.on_timeout(current, &mut self.timer)?;
                self.signal_activity(change);
            }
        }
        Ok(())
    }

    fn signal_activity(&mut self, change: Option<ActivityChange>) {
        if let (Some(change), Some(delegate)) = (change, self.delegate.as_mut()) {
            delegate.network_activity_changed(change == ActivityChange::Increased);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Application groups
    // ─────────────────────────────────────────────────────────────────────────

    /// Key id for encrypting messages to an application group.
    pub fn msg_enc_key_id_for_app_group(
        &self,
        app_group_global_id: u32,
        root_key_id: KeyId,
        use_rotating_key: bool,
    ) -> Result<KeyId> {
        msg_enc_key_id_for_app_group(&self.key_store, app_group_global_id, root_key_id, use_rotating_key)
    }

    /// Check that a received message was encrypted with a key of the group.
    pub fn check_msg_enc_for_app_group(
        &self,
        key_id: KeyId,
        app_group_global_id: u32,
        root_key_id: KeyId,
        require_rotating_key: bool,
    ) -> Result<()> {
        check_msg_enc_for_app_group(&self.key_store, key_id, app_group_global_id, root_key_id, require_rotating_key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Addressing
    // ─────────────────────────────────────────────────────────────────────────

    /// Fabric address of `node` on the default subnet.
    pub fn select_node_address(&self, node: NodeId) -> Ipv6Addr {
        self.select_node_address_in_subnet(node, self.default_subnet)
    }

    pub fn select_node_address_in_subnet(&self, node: NodeId, subnet: u16) -> Ipv6Addr {
        address::select_node_address(self.fabric_id, node, subnet)
    }

    pub fn is_fabric_address(&self, addr: &Ipv6Addr) -> bool {
        address::is_fabric_address(self.fabric_id, addr)
    }

    /// True if `addr` is this node's address in the current fabric.
    pub fn is_local_fabric_address(&self, addr: &Ipv6Addr) -> bool {
        self.is_fabric_address(addr) && interface_id_to_node_id(interface_id(addr)) == self.local_node_id
    }
}

impl<K, T> std::fmt::Debug for FabricState<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FabricState")
            .field("phase", &self.phase)
            .field("fabric_id", &self.fabric_id)
            .field("local_node_id", &self.local_node_id)
            .field("sessions", &self.sessions.allocated_count())
            .field("peers", &self.peers.len())
            .field("counter_sync", &self.counter_sync.phase())
            .finish_non_exhaustive()
    }
}
