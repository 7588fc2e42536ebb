//! # Fabric State Testkit
//!
//! Testing utilities for fabric state.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known suspended sessions and fabric configurations
//!   with their exact encodings
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Initialized nodes with sessions and group keys in place
//!
//! ## Golden Vectors
//!
//! Golden vectors pin the wire format of suspended sessions and exported
//! fabric state:
//!
//! ```rust
//! use fabric_state_testkit::vectors::{session_vectors, verify_session_vector};
//!
//! for vector in session_vectors() {
//!     verify_session_vector(&vector).unwrap();
//! }
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use fabric_state_testkit::generators::{encode_suspended_session, SuspendedSessionParams};
//!
//! proptest! {
//!     #[test]
//!     fn encoding_is_deterministic(params: SuspendedSessionParams) {
//!         prop_assert_eq!(encode_suspended_session(&params), encode_suspended_session(&params));
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Quickly set up test scenarios:
//!
//! ```rust
//! use fabric_state::EncryptionType;
//! use fabric_state_testkit::fixtures::{NodeFixture, PEER};
//!
//! let mut node = NodeFixture::new();
//! let (_, key_id) = node.establish_session(PEER, None);
//! let mut session = node
//!     .state
//!     .get_session_state(PEER, key_id, EncryptionType::Aes128CtrSha1, None)
//!     .unwrap();
//! assert!(!session.is_duplicate_message(1));
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{joined_pair, session_key, NodeFixture};
pub use generators::{encode_suspended_session, SuspendedSessionParams};
pub use vectors::{
    fabric_config_vectors, session_vectors, verify_all_vectors, FabricConfigVector, SessionVector,
};
