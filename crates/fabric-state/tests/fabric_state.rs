//! End-to-end behavior of a node's fabric state.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use fabric_state::core::{cert_type, MemoryCounterStorage, SeededRandom};
use fabric_state::keys::{GroupKey, GroupKeyStore, MemoryKeyStore};
use fabric_state::session::serializer;
use fabric_state::sync::{ManualTimer, SyncPhase, TimerEvent, TokioTimer};
use fabric_state::{
    AuthMode, ConnectionId, EncryptionKey, EncryptionType, FabricError, FabricState,
    FabricStateConfig, KeyId, NodeId, SessionHandle,
};

const PEER: NodeId = NodeId(0x18B4_3000_0000_0042);
const AES: EncryptionType = EncryptionType::Aes128CtrSha1;
const APP_GROUP: u32 = 0x0000_0B0B;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn node(config: FabricStateConfig, seed: u64) -> FabricState {
    init_tracing();
    let mut state = FabricState::new(config, MemoryKeyStore::new(), ManualTimer::new(), SeededRandom::new(seed)).unwrap();
    state.init(Box::new(MemoryCounterStorage::new())).unwrap();
    state
}

fn session_key() -> EncryptionKey {
    let mut bytes = [0u8; 36];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = i as u8;
    }
    EncryptionKey::from_bytes(bytes)
}

fn established(state: &mut FabricState, peer: NodeId, bound: Option<ConnectionId>) -> (SessionHandle, KeyId) {
    let session = state.alloc_session_key(peer, None, bound).unwrap();
    state
        .set_session_key(session, AES, AuthMode::Case(cert_type::DEVICE), &session_key())
        .unwrap();
    let key_id = state.sessions().get(session).unwrap().key_id();
    (session, key_id)
}

fn record_session_ends(state: &mut FabricState) -> Rc<RefCell<Vec<(KeyId, NodeId)>>> {
    let ended = Rc::new(RefCell::new(Vec::new()));
    let sink = ended.clone();
    state.subscribe_session_end(Box::new(move |key_id, peer| sink.borrow_mut().push((key_id, peer))));
    ended
}

#[test]
fn test_session_messages_are_numbered_and_screened() {
    let mut state = node(FabricStateConfig::default(), 1);
    let (_, key_id) = established(&mut state, PEER, None);

    let mut session = state.get_session_state(PEER, key_id, AES, None).unwrap();
    assert_eq!(session.auth_mode(), AuthMode::Case(cert_type::DEVICE));
    let first = session.new_message_id().unwrap();
    assert_ne!(first, 0);
    assert_eq!(session.new_message_id().unwrap(), first.wrapping_add(1));

    // The first message synchronizes the receive window.
    assert!(!session.is_duplicate_message(100));
    assert!(session.is_duplicate_message(100));
    assert!(!session.is_duplicate_message(101));
    assert!(session.is_duplicate_message(101));
    assert!(!session.is_duplicate_message(70));
    assert!(session.is_duplicate_message(70));
    assert!(session.is_duplicate_message(50));
}

#[test]
fn test_session_state_checks_encryption_and_binding() {
    let mut state = node(FabricStateConfig::default(), 2);
    let (_, key_id) = established(&mut state, PEER, Some(ConnectionId(4)));

    assert_eq!(
        state.get_session_state(PEER, key_id, EncryptionType::None, Some(ConnectionId(4))).err(),
        Some(FabricError::WrongEncryptionType)
    );
    assert_eq!(
        state.get_session_state(PEER, key_id, AES, Some(ConnectionId(5))).err(),
        Some(FabricError::InvalidUseOfSessionKey)
    );
    assert!(state.get_session_state(PEER, key_id, AES, Some(ConnectionId(4))).is_ok());
}

#[test]
fn test_table_capacity_is_enforced() {
    let config = FabricStateConfig { max_session_keys: 2, ..Default::default() };
    let mut state = node(config, 3);
    let (first, _) = established(&mut state, PEER, None);
    established(&mut state, PEER, None);

    assert_eq!(state.alloc_session_key(PEER, None, None).err(), Some(FabricError::TooManyKeys));
    state.remove_session_key(first).unwrap();
    assert!(state.alloc_session_key(PEER, None, None).is_ok());
    assert_eq!(state.alloc_session_key(PEER, None, None).err(), Some(FabricError::TooManyKeys));
}

#[test]
fn test_removed_session_is_gone_and_reported() {
    let mut state = node(FabricStateConfig::default(), 4);
    let ended = record_session_ends(&mut state);
    let (session, key_id) = established(&mut state, PEER, None);

    state.remove_session_key_by_id(key_id, PEER).unwrap();
    assert_eq!(state.find_session_key(key_id, PEER, false).err(), Some(FabricError::KeyNotFound));
    assert!(state.sessions().get(session).is_err());
    assert_eq!(*ended.borrow(), vec![(key_id, PEER)]);
}

#[test]
fn test_idle_sessions_survive_one_sweep() {
    let mut state = node(FabricStateConfig::default(), 5);
    let ended = record_session_ends(&mut state);
    let (session, key_id) = established(&mut state, PEER, None);
    state.set_remove_on_idle(session, true).unwrap();
    state.release_session_key(session).unwrap();

    assert!(state.remove_idle_session_keys());
    // Activity between sweeps keeps the session for another period.
    state.get_session_state(PEER, key_id, AES, None).unwrap();
    assert!(state.remove_idle_session_keys());
    assert!(state.find_session_key(key_id, PEER, false).is_ok());

    assert!(!state.remove_idle_session_keys());
    assert_eq!(state.find_session_key(key_id, PEER, false).err(), Some(FabricError::KeyNotFound));
    assert_eq!(ended.borrow().len(), 1);
}

#[test]
fn test_closing_a_connection_removes_bound_sessions() {
    let mut state = node(FabricStateConfig::default(), 6);
    let ended = record_session_ends(&mut state);
    established(&mut state, PEER, Some(ConnectionId(9)));
    established(&mut state, PEER, Some(ConnectionId(10)));
    established(&mut state, NodeId(0x77), None);

    assert_eq!(state.handle_connection_closed(ConnectionId(9)), 1);
    assert_eq!(state.sessions().allocated_count(), 2);
    assert_eq!(ended.borrow().len(), 1);
}

#[test]
fn test_suspended_session_resumes_where_it_left_off() {
    let mut state = node(FabricStateConfig::default(), 7);
    let (session, key_id) = established(&mut state, PEER, None);
    state.set_locally_initiated(session, true).unwrap();

    let next_id = {
        let mut s = state.get_session_state(PEER, key_id, AES, None).unwrap();
        assert!(!s.is_duplicate_message(500));
        assert!(!s.is_duplicate_message(502));
        s.new_message_id().unwrap() + 1
    };

    let mut buf = [0u8; serializer::max_suspended_len(0)];
    let len = state.suspend_session(key_id, PEER, &mut buf).unwrap();
    assert!(state.sessions().get(session).unwrap().key().is_zero());
    assert_eq!(
        state.get_session_state(PEER, key_id, AES, None).err(),
        Some(FabricError::SessionKeySuspended)
    );

    let restored = state.restore_session(&buf[..len]).unwrap();
    let entry = state.sessions().get(restored).unwrap();
    assert_eq!(entry.key(), &session_key());
    assert!(entry.is_locally_initiated());

    let mut s = state.get_session_state(PEER, key_id, AES, None).unwrap();
    assert_eq!(s.new_message_id().unwrap(), next_id);
    assert!(s.is_duplicate_message(502));
    assert!(s.is_duplicate_message(500));
    assert!(!s.is_duplicate_message(501));
    assert!(!s.is_duplicate_message(503));
}

#[test]
fn test_suspend_refuses_unauthenticated_sessions() {
    let mut state = node(FabricStateConfig::default(), 8);
    let session = state.alloc_session_key(PEER, None, None).unwrap();
    state.set_session_key(session, AES, AuthMode::Pase(1), &session_key()).unwrap();
    let key_id = state.sessions().get(session).unwrap().key_id();

    let mut buf = [0xAAu8; 128];
    assert_eq!(
        state.suspend_session(key_id, PEER, &mut buf),
        Err(FabricError::InvalidUseOfSessionKey)
    );
    assert!(buf.iter().all(|b| *b == 0));
}

#[test]
fn test_shared_sessions_answer_for_their_end_nodes() {
    let config = FabricStateConfig {
        max_shared_session_end_nodes: 4,
        max_end_nodes_per_shared_session: 2,
        ..Default::default()
    };
    let mut state = node(config, 9);
    let terminating = NodeId(0x18B4_3000_0000_00FE);
    let (session, key_id) = established(&mut state, terminating, None);
    state.set_shared_session(session, true).unwrap();

    state.add_shared_session_end_node(terminating, terminating, key_id).unwrap();
    state.add_shared_session_end_node(NodeId(0xA1), terminating, key_id).unwrap();
    state.add_shared_session_end_node(NodeId(0xA2), terminating, key_id).unwrap();
    assert_eq!(
        state.add_shared_session_end_node(NodeId(0xA3), terminating, key_id),
        Err(FabricError::TooManySharedSessionEndNodes)
    );
    assert_eq!(state.shared_session_end_nodes(session).unwrap(), vec![NodeId(0xA1), NodeId(0xA2)]);

    assert!(state.is_shared_session(key_id, NodeId(0xA1)));
    assert_eq!(
        state.find_shared_session(terminating, AuthMode::Case(cert_type::DEVICE), AES),
        Some(session)
    );
    assert!(state.get_session_state(NodeId(0xA2), key_id, AES, None).is_ok());

    state.remove_session_key(session).unwrap();
    assert!(state.sessions().end_node_registry().is_empty());
}

fn provision_app_group(state: &mut FabricState) -> KeyId {
    state.create_fabric().unwrap();
    state
        .key_store_mut()
        .store_group_key(
            GroupKey::new(KeyId::make_group_master_key_id(5), &[0x5A; 32])
                .unwrap()
                .with_app_group_global_id(APP_GROUP),
        )
        .unwrap();
    state.msg_enc_key_id_for_app_group(APP_GROUP, KeyId::FABRIC_ROOT_KEY, false).unwrap()
}

#[test]
fn test_group_keyed_traffic_waits_for_counter_sync() {
    let mut state = node(FabricStateConfig::default(), 10);
    let key_id = provision_app_group(&mut state);
    assert_eq!(state.check_msg_enc_for_app_group(key_id, APP_GROUP, KeyId::FABRIC_ROOT_KEY, false), Ok(()));

    let request_id = {
        let mut s = state.get_session_state(PEER, key_id, AES, None).unwrap();
        assert_eq!(s.auth_mode(), AuthMode::GroupKey(5));
        assert!(s.is_duplicate_message(900));
        s.new_message_id().unwrap()
    };
    assert!(state.app_key_cache().contains(key_id, AES));

    state.on_msg_counter_sync_req_sent(request_id).unwrap();
    assert_eq!(state.on_msg_counter_sync_resp_rcvd(PEER, 900, request_id), Ok(true));

    let mut s = state.get_session_state(PEER, key_id, AES, None).unwrap();
    assert!(!s.is_duplicate_message(901));
    assert!(s.is_duplicate_message(900));
    assert!(s.is_duplicate_message(901));
}

#[test]
fn test_group_keys_require_a_fabric() {
    let mut state = node(FabricStateConfig::default(), 11);
    let key_id = provision_app_group(&mut state);
    state.leave_fabric().unwrap();
    assert!(!state.app_key_cache().contains(key_id, AES));
    assert_eq!(
        state.get_session_state(PEER, key_id, AES, None).err(),
        Some(FabricError::KeyNotFound)
    );
}

#[test]
fn test_shutdown_wipes_sessions() {
    let mut state = node(FabricStateConfig::default(), 12);
    let (session, _) = established(&mut state, PEER, None);
    state.shutdown();
    assert!(state.sessions().get(session).is_err());
    assert_eq!(state.sessions().allocated_count(), 0);
    assert_eq!(state.remove_session_key(session), Err(FabricError::IncorrectState));
}

#[test]
fn test_config_from_json_sizes_the_state() {
    let config = FabricStateConfig::from_json_str(r#"{"max_session_keys": 1, "max_peer_nodes": 2}"#).unwrap();
    let mut state = node(config, 13);
    assert_eq!(state.sessions().capacity(), 1);
    for n in 1..=3 {
        state
            .get_session_state(NodeId(n), KeyId::NONE, EncryptionType::None, None)
            .unwrap();
    }
    assert_eq!(state.peer_states().len(), 2);
}

#[tokio::test]
async fn test_counter_sync_timeouts_arrive_through_tokio() {
    let config = FabricStateConfig { msg_counter_sync_resp_timeout_ms: 10, ..Default::default() };
    init_tracing();
    let (timer, mut events) = TokioTimer::new().unwrap();
    let mut state = FabricState::new(config, MemoryKeyStore::new(), timer, SeededRandom::new(14)).unwrap();
    state.init(Box::new(MemoryCounterStorage::new())).unwrap();

    state.on_msg_counter_sync_req_sent(0).unwrap();
    assert_eq!(state.counter_sync().phase(), SyncPhase::RequestInProgress);

    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, TimerEvent::MsgCounterSyncTimeout);
        state.handle_timer_event(event).unwrap();
    }
    assert_eq!(state.counter_sync().phase(), SyncPhase::Idle);
}
