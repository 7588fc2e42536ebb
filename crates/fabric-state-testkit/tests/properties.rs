//! Property tests across the fabric state crates.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use proptest::prelude::*;

use fabric_state::core::{CounterStorage, MessageCounter, PersistedCounter};
use fabric_state::session::{serializer, SessionKeyTable};
use fabric_state::sync::PeerStateCache;
use fabric_state::{AuthMode, EncryptionType, NodeId};
use fabric_state_testkit::fixtures::{NodeFixture, PEER};
use fabric_state_testkit::generators::{counter_run, encode_suspended_session, SuspendedSessionParams};

/// Duplicate detection for an encrypted session, kept as a set of the
/// counters seen within the window behind the highest one.
#[derive(Default)]
struct ReplayModel {
    max: Option<u32>,
    seen: BTreeSet<u32>,
}

impl ReplayModel {
    const WIDTH: u32 = 32;

    /// Offsets are relative to the run's base, so plain integer order applies.
    fn is_duplicate(&mut self, offset: u32) -> bool {
        let Some(max) = self.max else {
            self.max = Some(offset);
            return false;
        };
        if offset > max {
            if offset - max < Self::WIDTH {
                self.seen.insert(max);
                self.seen.retain(|c| offset - c <= Self::WIDTH);
            } else {
                self.seen.clear();
            }
            self.max = Some(offset);
            return false;
        }
        if offset == max || max - offset > Self::WIDTH {
            return true;
        }
        !self.seen.insert(offset)
    }
}

/// Storage whose checkpoint survives the counter that wrote it.
#[derive(Clone, Default)]
struct SharedStorage(Rc<RefCell<Option<u32>>>);

impl CounterStorage for SharedStorage {
    fn load(&self) -> fabric_state::Result<Option<u32>> {
        Ok(*self.0.borrow())
    }

    fn store(&mut self, value: u32) -> fabric_state::Result<()> {
        *self.0.borrow_mut() = Some(value);
        Ok(())
    }
}

proptest! {
    #[test]
    fn test_session_replay_matches_model((base, offsets) in counter_run(64)) {
        let mut node = NodeFixture::with_seed(1);
        let (_, key_id) = node.establish_session(PEER, None);
        let mut model = ReplayModel::default();

        for offset in offsets {
            let mut session = node
                .state
                .get_session_state(PEER, key_id, EncryptionType::Aes128CtrSha1, None)
                .unwrap();
            let counter = base.wrapping_add(offset);
            prop_assert_eq!(
                session.is_duplicate_message(counter),
                model.is_duplicate(offset),
                "counter {} (offset {})", counter, offset
            );
        }
    }

    #[test]
    fn test_persisted_counter_never_repeats(epoch in 1u32..64, runs in prop::collection::vec(0usize..200, 1..6)) {
        let storage = SharedStorage::default();
        let mut handed_out = BTreeSet::new();

        for advances in runs {
            let mut counter = PersistedCounter::init(Box::new(storage.clone()), epoch).unwrap();
            let mut last = None;
            for _ in 0..advances {
                let value = counter.value();
                prop_assert!(handed_out.insert(value), "value {} handed out twice", value);
                if let Some(last) = last {
                    prop_assert_eq!(value, u32::wrapping_add(last, 1));
                }
                last = Some(value);
                counter.advance().unwrap();
            }
            let stored = storage.load().unwrap().unwrap();
            prop_assert!(stored.wrapping_sub(counter.value()) <= epoch);
        }
    }

    #[test]
    fn test_suspended_session_round_trips(params: SuspendedSessionParams) {
        let encoded = encode_suspended_session(&params);
        let mut table = SessionKeyTable::new(2, 8, 4);

        let session = serializer::restore(&mut table, &encoded).unwrap();
        {
            let entry = table.get(session).unwrap();
            prop_assert_eq!(entry.key_id(), params.key_id);
            prop_assert_eq!(entry.node_id(), params.peer);
            prop_assert_eq!(entry.next_message_id(), params.next_msg_id);
            prop_assert_eq!(*entry.receive_state(), params.receive);
            prop_assert_eq!(entry.auth_mode(), AuthMode::Case(params.cert_type));
            prop_assert!(entry.key() == &params.key);
        }
        prop_assert_eq!(
            table.shared_session_end_nodes(session).unwrap(),
            params.end_nodes.clone().unwrap_or_default()
        );

        let end_nodes = params.end_nodes.as_ref().map_or(0, Vec::len);
        let mut buf = vec![0u8; serializer::max_suspended_len(end_nodes)];
        let len = serializer::suspend(&mut table, session, &mut buf).unwrap();
        prop_assert_eq!(&buf[..len], &encoded[..]);
        prop_assert!(table.get(session).unwrap().key().is_zero());
    }

    #[test]
    fn test_truncated_session_never_restores(params: SuspendedSessionParams, cut in any::<prop::sample::Index>()) {
        let encoded = encode_suspended_session(&params);
        let len = cut.index(encoded.len());
        let mut table = SessionKeyTable::new(2, 8, 4);

        prop_assert!(serializer::restore(&mut table, &encoded[..len]).is_err());
        prop_assert_eq!(table.allocated_count(), 0);
    }

    #[test]
    fn test_peer_cache_stays_within_capacity(
        capacity in 1usize..16,
        peers in prop::collection::vec(1u64..40, 1..100),
    ) {
        let mut cache = PeerStateCache::new(capacity);
        for &peer in &peers {
            cache.find_or_alloc(NodeId(peer));
            prop_assert!(cache.len() <= capacity);
            prop_assert_eq!(cache.peers_by_recency().next(), Some(NodeId(peer)));
        }

        let distinct: BTreeSet<_> = peers.iter().collect();
        prop_assert_eq!(cache.len(), distinct.len().min(capacity));
    }
}
