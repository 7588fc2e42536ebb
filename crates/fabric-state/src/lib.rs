//! # Fabric State
//!
//! Fabric membership and session state for nodes of a secure mesh network.
//!
//! ## Overview
//!
//! A node keeps, for the fabric it belongs to:
//!
//! - **Sessions**: negotiated session keys with their outbound counters and
//!   replay windows, suspended to a buffer before sleep and restored after
//! - **Peer state**: replay windows for unencrypted and group-keyed traffic
//! - **Group keys**: the fabric secret and application group keys, with
//!   derived message keys cached
//! - **Counter sync**: the fresh window that decides which group-key
//!   counter sync responses to trust
//!
//! ## Usage
//!
//! ```rust
//! use fabric_state::core::{EncryptionType, KeyId, MemoryCounterStorage, NodeId, OsRandom};
//! use fabric_state::keys::MemoryKeyStore;
//! use fabric_state::sync::ManualTimer;
//! use fabric_state::{FabricState, FabricStateConfig};
//!
//! let mut state = FabricState::new(
//!     FabricStateConfig::default(),
//!     MemoryKeyStore::new(),
//!     ManualTimer::new(),
//!     OsRandom,
//! )
//! .unwrap();
//! state.init(Box::new(MemoryCounterStorage::new())).unwrap();
//! state.create_fabric().unwrap();
//!
//! // Screen an unencrypted message from a peer.
//! let peer = NodeId(0x18B4_3000_0000_0001);
//! let mut session = state
//!     .get_session_state(peer, KeyId::NONE, EncryptionType::None, None)
//!     .unwrap();
//! assert!(!session.is_duplicate_message(1));
//! assert!(session.is_duplicate_message(1));
//! ```
//!
//! ## Re-exports
//!
//! - `fabric_state::core` - Identifiers, keys, counters, replay windows, encoding
//! - `fabric_state::session` - Session key table and suspend/restore
//! - `fabric_state::keys` - Group key store and application keys
//! - `fabric_state::sync` - Peer cache, counter sync and timers

pub mod config;
pub mod error;
pub mod fabric;

pub use fabric_state_core as core;
pub use fabric_state_keys as keys;
pub use fabric_state_session as session;
pub use fabric_state_sync as sync;

pub use config::FabricStateConfig;
pub use error::ConfigError;
pub use fabric::{FabricState, FabricStateDelegate, Phase, FABRIC_SECRET_SIZE};

pub use fabric_state_core::{
    AuthMode, ConnectionId, EncryptionKey, EncryptionType, FabricError, FabricId, KeyId, NodeId,
    Result, SessionState,
};
pub use fabric_state_session::SessionHandle;
