//! # Fabric State Keys
//!
//! Group keys of a fabric: the fabric secret, application root, epoch and
//! group master keys, and the message encryption keys derived from them.
//!
//! ## Overview
//!
//! - [`GroupKeyStore`] is the persistent store contract; [`MemoryKeyStore`]
//!   keeps keys in memory and derives with BLAKE3.
//! - [`AppKeyCache`] holds recently used derived message keys.
//! - [`fabric_config`] encodes the fabric id and secret exchanged when a
//!   node joins a fabric.
//!
//! All secrets are wiped when dropped.

pub mod app_key_cache;
pub mod app_keys;
pub mod error;
pub mod fabric_config;
pub mod key_store;

pub use app_key_cache::AppKeyCache;
pub use app_keys::{
    check_msg_enc_for_app_group, derive_msg_enc_app_key, msg_enc_key_id_for_app_group,
    MSG_ENC_APP_KEY_DIVERSIFIER,
};
pub use error::{KeyStoreError, Result};
pub use fabric_config::{decode_fabric_config, encode_fabric_config, FabricConfig, FABRIC_CONFIG_LEN};
pub use key_store::{GroupKey, GroupKeyStore, MemoryKeyStore, MAX_GROUP_KEY_SIZE};
