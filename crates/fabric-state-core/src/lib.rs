//! # Fabric State Core
//!
//! Primitives shared by every fabric state component: identifiers, message
//! encryption keys, outbound counters, replay windows, and the tag-ordered
//! encoding used to persist sessions and fabric configuration.
//!
//! This crate performs no I/O beyond the random source and counter storage
//! contracts it defines.
//!
//! ## Key Types
//!
//! - [`NodeId`], [`FabricId`], [`KeyId`] - Identifier newtypes
//! - [`MessageEncryptionKey`] - Key id, algorithm and wiped-on-drop key bytes
//! - [`MessageCounter`] - Outbound counters, in memory or persisted
//! - [`ReceiveState`] - Replay window for one peer or session
//! - [`SessionState`] - Per-message view used to number and screen messages
//!
//! ## Encoding
//!
//! Serialized structures use deterministic CBOR with ordered integer field
//! tags. See [`tlv`].

pub mod address;
pub mod counter;
pub mod crypto;
pub mod error;
pub mod replay;
pub mod rng;
pub mod session_state;
pub mod tlv;
pub mod types;

pub use counter::{
    counter_delta, counter_is_after, CounterStorage, MemoryCounterStorage, MessageCounter,
    MonotonicCounter, PersistedCounter,
};
pub use crypto::{cert_type, AuthMode, EncryptionKey, EncryptionType, MessageEncryptionKey};
pub use error::{FabricError, Result};
pub use replay::{ReceiveState, ReplayVerdict, WINDOW_SIZE};
pub use rng::{OsRandom, RandomSource, SeededRandom};
pub use session_state::SessionState;
pub use tlv::{Tag, TagReader, TagWriter};
pub use types::{ConnectionId, FabricId, KeyId, KeyType, NodeId};
