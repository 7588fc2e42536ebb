//! Message encryption key material and authentication modes.
//!
//! Key bytes are wiped on drop and whenever a holder clears them; nothing in
//! this module ever formats key bytes.

use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{FabricError, Result};
use crate::types::KeyId;

/// Message encryption algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EncryptionType {
    /// Unencrypted.
    #[default]
    None = 0x00,
    /// AES-128-CTR encryption with HMAC-SHA1 integrity.
    Aes128CtrSha1 = 0x01,
}

impl EncryptionType {
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::None),
            0x01 => Some(Self::Aes128CtrSha1),
            _ => None,
        }
    }
}

/// Key material sizes for [`EncryptionType::Aes128CtrSha1`].
pub mod aes128ctr_sha1 {
    pub const DATA_KEY_SIZE: usize = 16;
    pub const INTEGRITY_KEY_SIZE: usize = 20;
    pub const KEY_SIZE: usize = DATA_KEY_SIZE + INTEGRITY_KEY_SIZE;
}

/// Raw key material: a data key followed by an integrity key.
///
/// Equality runs in constant time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; aes128ctr_sha1::KEY_SIZE]);

impl EncryptionKey {
    pub const fn zeroed() -> Self {
        Self([0u8; aes128ctr_sha1::KEY_SIZE])
    }

    pub fn from_bytes(bytes: [u8; aes128ctr_sha1::KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Assemble from separate data and integrity keys.
    ///
    /// Fails with `InvalidArgument` unless both lengths are exact.
    pub fn from_parts(data_key: &[u8], integrity_key: &[u8]) -> Result<Self> {
        if data_key.len() != aes128ctr_sha1::DATA_KEY_SIZE
            || integrity_key.len() != aes128ctr_sha1::INTEGRITY_KEY_SIZE
        {
            return Err(FabricError::InvalidArgument);
        }
        let mut key = Self::zeroed();
        key.0[..aes128ctr_sha1::DATA_KEY_SIZE].copy_from_slice(data_key);
        key.0[aes128ctr_sha1::DATA_KEY_SIZE..].copy_from_slice(integrity_key);
        Ok(key)
    }

    pub fn data_key(&self) -> &[u8] {
        &self.0[..aes128ctr_sha1::DATA_KEY_SIZE]
    }

    pub fn integrity_key(&self) -> &[u8] {
        &self.0[aes128ctr_sha1::DATA_KEY_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8; aes128ctr_sha1::KEY_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for EncryptionKey {}

impl Default for EncryptionKey {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// A key id together with its algorithm and material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEncryptionKey {
    pub key_id: KeyId,
    pub enc_type: EncryptionType,
    pub key: EncryptionKey,
}

impl MessageEncryptionKey {
    /// True once key material has been installed.
    pub fn is_key_set(&self) -> bool {
        self.enc_type != EncryptionType::None
    }

    /// Reset to the empty state, wiping the key bytes.
    pub fn clear(&mut self) {
        self.key_id = KeyId::NONE;
        self.enc_type = EncryptionType::None;
        self.key.zeroize();
    }
}

/// Certificate type presented by a CASE peer.
pub mod cert_type {
    pub const NOT_SPECIFIED: u8 = 0x00;
    pub const GENERAL: u8 = 0x01;
    pub const DEVICE: u8 = 0x02;
    pub const SERVICE_ENDPOINT: u8 = 0x03;
    pub const FIRMWARE_SIGNING: u8 = 0x04;
    pub const ACCESS_TOKEN: u8 = 0x05;
    pub const CA: u8 = 0x06;
}

/// How the peer of a session or message was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthMode {
    #[default]
    NotSpecified,
    Unauthenticated,
    /// Password-authenticated session establishment; carries the password source.
    Pase(u8),
    /// Certificate-authenticated session establishment; carries the peer certificate type.
    Case(u8),
    /// Application group key; carries the group-local master key number.
    GroupKey(u8),
}

impl AuthMode {
    const CATEGORY_MASK: u16 = 0xF00;
    const CATEGORY_GENERAL: u16 = 0x000;
    const CATEGORY_PASE: u16 = 0x100;
    const CATEGORY_CASE: u16 = 0x200;
    const CATEGORY_GROUP_KEY: u16 = 0x300;

    /// Auth mode for messages encrypted with the application key `key_id`.
    pub fn group_key(key_id: KeyId) -> Self {
        Self::GroupKey(key_id.app_group_local_number())
    }

    pub const fn is_cert_auth(&self) -> bool {
        matches!(self, Self::Case(_))
    }

    /// Peer certificate type for CASE sessions.
    pub const fn cert_type(&self) -> Option<u8> {
        match self {
            Self::Case(t) => Some(*t),
            _ => None,
        }
    }

    pub const fn to_u16(self) -> u16 {
        match self {
            Self::NotSpecified => Self::CATEGORY_GENERAL,
            Self::Unauthenticated => Self::CATEGORY_GENERAL | 0x001,
            Self::Pase(v) => Self::CATEGORY_PASE | v as u16,
            Self::Case(v) => Self::CATEGORY_CASE | v as u16,
            Self::GroupKey(v) => Self::CATEGORY_GROUP_KEY | v as u16,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        if v & !(Self::CATEGORY_MASK | 0xFF) != 0 {
            return None;
        }
        let low = (v & 0xFF) as u8;
        match v & Self::CATEGORY_MASK {
            Self::CATEGORY_GENERAL => match low {
                0x00 => Some(Self::NotSpecified),
                0x01 => Some(Self::Unauthenticated),
                _ => None,
            },
            Self::CATEGORY_PASE => Some(Self::Pase(low)),
            Self::CATEGORY_CASE => Some(Self::Case(low)),
            Self::CATEGORY_GROUP_KEY => Some(Self::GroupKey(low)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_parts() {
        let key = EncryptionKey::from_parts(&[1u8; 16], &[2u8; 20]).unwrap();
        assert_eq!(key.data_key(), &[1u8; 16]);
        assert_eq!(key.integrity_key(), &[2u8; 20]);
        assert!(!key.is_zero());
    }

    #[test]
    fn test_key_from_parts_rejects_lengths() {
        assert_eq!(
            EncryptionKey::from_parts(&[1u8; 15], &[2u8; 20]),
            Err(FabricError::InvalidArgument)
        );
        assert_eq!(
            EncryptionKey::from_parts(&[1u8; 16], &[2u8; 21]),
            Err(FabricError::InvalidArgument)
        );
    }

    #[test]
    fn test_key_equality_covers_every_byte() {
        let key = EncryptionKey::from_bytes([0x5A; 36]);
        assert_eq!(key, EncryptionKey::from_bytes([0x5A; 36]));

        for i in [0, 15, 16, 35] {
            let mut bytes = [0x5A; 36];
            bytes[i] ^= 0x01;
            assert_ne!(key, EncryptionKey::from_bytes(bytes), "byte {i}");
        }
    }

    #[test]
    fn test_key_debug_hides_bytes() {
        let key = EncryptionKey::from_bytes([0xAB; 36]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(..)");
    }

    #[test]
    fn test_message_key_clear_wipes() {
        let mut key = MessageEncryptionKey {
            key_id: KeyId::make_session_key_id(7),
            enc_type: EncryptionType::Aes128CtrSha1,
            key: EncryptionKey::from_bytes([0x5A; 36]),
        };
        assert!(key.is_key_set());
        key.clear();
        assert!(!key.is_key_set());
        assert_eq!(key.key_id, KeyId::NONE);
        assert!(key.key.is_zero());
    }

    #[test]
    fn test_auth_mode_codes() {
        assert_eq!(AuthMode::Case(cert_type::DEVICE).to_u16(), 0x202);
        assert_eq!(AuthMode::from_u16(0x202), Some(AuthMode::Case(cert_type::DEVICE)));
        assert_eq!(AuthMode::Unauthenticated.to_u16(), 0x001);
        assert_eq!(AuthMode::from_u16(0x305), Some(AuthMode::GroupKey(5)));
        assert_eq!(AuthMode::from_u16(0x002), None);
        assert_eq!(AuthMode::from_u16(0x402), None);
    }

    #[test]
    fn test_group_key_auth_mode() {
        let master = KeyId::make_group_master_key_id(0x11);
        let key_id = KeyId::make_app_static_key_id(KeyId::FABRIC_ROOT_KEY, master);
        assert_eq!(AuthMode::group_key(key_id), AuthMode::GroupKey(0x11));
        assert!(!AuthMode::group_key(key_id).is_cert_auth());
        assert!(AuthMode::Case(1).is_cert_auth());
    }
}
