//! # Fabric State Session
//!
//! The session key table of a fabric node.
//!
//! ## Overview
//!
//! Sessions are established elsewhere; this crate holds their negotiated
//! keys, outbound counters and replay windows, and decides when they go
//! away. Capacity is fixed at construction.
//!
//! ## Key Properties
//!
//! - **Unique**: at most one allocated session per (key id, peer)
//! - **Wiped**: key bytes are zeroed on removal and on suspend
//! - **Generation-checked**: a [`SessionHandle`] outliving its session never
//!   resolves to the slot's next occupant
//!
//! ## Lifecycle
//!
//! ```text
//! allocate --> set_key_material --> active <--> suspended
//!     |                               |            |
//!     +------------ remove / idle / connection closed
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use fabric_state_core::{AuthMode, EncryptionKey, EncryptionType, NodeId, SeededRandom};
//! use fabric_state_session::{serializer, SessionKeyTable};
//!
//! let mut rng = SeededRandom::new(7);
//! let mut table = SessionKeyTable::new(8, 8, 4);
//! let peer = NodeId(0x18B4_3000_0000_0001);
//!
//! let session = table.allocate(peer, None, None, &mut rng).unwrap();
//! table
//!     .set_key_material(
//!         session,
//!         EncryptionType::Aes128CtrSha1,
//!         AuthMode::Case(2),
//!         &EncryptionKey::from_bytes([7; 36]),
//!         &mut rng,
//!     )
//!     .unwrap();
//!
//! let mut buf = [0u8; 128];
//! let len = serializer::suspend(&mut table, session, &mut buf).unwrap();
//! let restored = serializer::restore(&mut table, &buf[..len]).unwrap();
//! assert_eq!(restored, session);
//! ```

pub mod end_nodes;
pub mod entry;
pub mod serializer;
pub mod table;

pub use end_nodes::SharedSessionEndNodeRegistry;
pub use entry::{SessionFlags, SessionHandle, SessionKeyEntry};
pub use table::{SessionEndCallback, SessionKeyTable, SubscriptionId};
