//! Strong type definitions for fabric state.
//!
//! All identifiers are newtypes to prevent mixing node, fabric and key ids.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 64-bit node identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Sentinel for "no node".
    pub const NOT_SPECIFIED: Self = Self(0);

    /// Broadcast identity.
    pub const ANY: Self = Self(u64::MAX);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    /// True for identities that can own a session (neither unspecified nor broadcast).
    pub const fn is_peer_identity(&self) -> bool {
        self.0 != Self::NOT_SPECIFIED.0 && self.0 != Self::ANY.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:016X})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A 64-bit fabric identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FabricId(pub u64);

impl FabricId {
    /// Not a member of any fabric.
    pub const NOT_SPECIFIED: Self = Self(0);

    /// First id of the range that is never generated randomly.
    pub const RESERVED_START: u64 = 0xFFFF_FFFF_FFFF_FF00;

    pub const fn value(&self) -> u64 {
        self.0
    }

    pub const fn is_specified(&self) -> bool {
        self.0 != Self::NOT_SPECIFIED.0
    }

    /// True if a randomly drawn id may be used for a new fabric.
    pub const fn is_assignable(id: u64) -> bool {
        id != Self::NOT_SPECIFIED.0 && id < Self::RESERVED_START
    }

    /// The 40-bit IPv6 ULA global id for this fabric.
    pub const fn ipv6_global_id(&self) -> u64 {
        self.0 & 0xFF_FFFF_FFFF
    }
}

impl fmt::Debug for FabricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FabricId({:016X})", self.0)
    }
}

impl fmt::Display for FabricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// The namespace a [`KeyId`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum KeyType {
    None = 0x0000_0000,
    General = 0x0000_1000,
    Session = 0x0000_2000,
    AppStatic = 0x0000_4000,
    AppRotating = 0x0000_5000,
    AppRoot = 0x0001_0000,
    AppEpoch = 0x0002_0000,
    AppGroupMaster = 0x0003_0000,
}

impl KeyType {
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x0000_0000 => Some(Self::None),
            0x0000_1000 => Some(Self::General),
            0x0000_2000 => Some(Self::Session),
            0x0000_4000 => Some(Self::AppStatic),
            0x0000_5000 => Some(Self::AppRotating),
            0x0001_0000 => Some(Self::AppRoot),
            0x0002_0000 => Some(Self::AppEpoch),
            0x0003_0000 => Some(Self::AppGroupMaster),
            _ => None,
        }
    }
}

/// A key identifier.
///
/// Layout: `FFFF TTTT TTTT TTTT TTTT NNNN NNNN NNNN` where `F` are flags,
/// `T` the key type and `N` the key number. Application message keys split
/// the number into a root key number (`0x0C00`), an epoch key number
/// (`0x0380`) and a group-local master key number (`0x007F`).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId(pub u32);

impl KeyId {
    pub const MASK_FLAGS: u32 = 0xF000_0000;
    pub const MASK_TYPE: u32 = 0x0FFF_F000;
    pub const MASK_NUMBER: u32 = 0x0000_0FFF;
    pub const MASK_ROOT_KEY_NUMBER: u32 = 0x0000_0C00;
    pub const MASK_EPOCH_KEY_NUMBER: u32 = 0x0000_0380;
    pub const MASK_GROUP_LOCAL_NUMBER: u32 = 0x0000_007F;
    pub const FLAG_USE_CURRENT_EPOCH_KEY: u32 = 0x8000_0000;

    /// No key; messages are unencrypted.
    pub const NONE: Self = Self(0);
    /// The fabric secret held by the group key store.
    pub const FABRIC_SECRET: Self = Self(KeyType::General as u32 | 0x001);
    pub const FABRIC_ROOT_KEY: Self = Self(KeyType::AppRoot as u32);
    pub const CLIENT_ROOT_KEY: Self = Self(KeyType::AppRoot as u32 | (1 << 10));
    pub const SERVICE_ROOT_KEY: Self = Self(KeyType::AppRoot as u32 | (2 << 10));

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Build a session key id from a key number; bits above the number mask are dropped.
    pub const fn make_session_key_id(number: u16) -> Self {
        Self(KeyType::Session as u32 | (number as u32 & Self::MASK_NUMBER))
    }

    pub const fn make_epoch_key_id(epoch_number: u8) -> Self {
        Self(KeyType::AppEpoch as u32 | (((epoch_number as u32) << 7) & Self::MASK_EPOCH_KEY_NUMBER))
    }

    pub const fn make_group_master_key_id(local_number: u8) -> Self {
        Self(KeyType::AppGroupMaster as u32 | (local_number as u32 & Self::MASK_GROUP_LOCAL_NUMBER))
    }

    /// Static application key derived from `root_key` and `master_key`.
    pub const fn make_app_static_key_id(root_key: KeyId, master_key: KeyId) -> Self {
        Self(
            KeyType::AppStatic as u32
                | (root_key.0 & Self::MASK_ROOT_KEY_NUMBER)
                | (master_key.0 & Self::MASK_GROUP_LOCAL_NUMBER),
        )
    }

    /// Rotating application key derived from `root_key`, `epoch_key` and `master_key`.
    pub const fn make_app_rotating_key_id(
        root_key: KeyId,
        epoch_key: KeyId,
        master_key: KeyId,
        use_current_epoch_key: bool,
    ) -> Self {
        let flag = if use_current_epoch_key { Self::FLAG_USE_CURRENT_EPOCH_KEY } else { 0 };
        Self(
            KeyType::AppRotating as u32
                | (root_key.0 & Self::MASK_ROOT_KEY_NUMBER)
                | (epoch_key.0 & Self::MASK_EPOCH_KEY_NUMBER)
                | (master_key.0 & Self::MASK_GROUP_LOCAL_NUMBER)
                | flag,
        )
    }

    /// Raw type bits, which may not name a known [`KeyType`].
    pub const fn type_bits(&self) -> u32 {
        self.0 & Self::MASK_TYPE
    }

    pub fn key_type(&self) -> Option<KeyType> {
        KeyType::from_u32(self.type_bits())
    }

    pub const fn is_session_key(&self) -> bool {
        self.type_bits() == KeyType::Session as u32
    }

    pub const fn is_app_static_key(&self) -> bool {
        self.type_bits() == KeyType::AppStatic as u32
    }

    pub const fn is_app_rotating_key(&self) -> bool {
        self.type_bits() == KeyType::AppRotating as u32
    }

    /// Static or rotating application group message key.
    pub const fn is_app_group_key(&self) -> bool {
        self.is_app_static_key() || self.is_app_rotating_key()
    }

    pub const fn uses_current_epoch_key(&self) -> bool {
        self.0 & Self::FLAG_USE_CURRENT_EPOCH_KEY != 0
    }

    /// Root key an application key was derived from.
    pub const fn root_key_id(&self) -> KeyId {
        Self(KeyType::AppRoot as u32 | (self.0 & Self::MASK_ROOT_KEY_NUMBER))
    }

    pub const fn epoch_key_id(&self) -> KeyId {
        Self(KeyType::AppEpoch as u32 | (self.0 & Self::MASK_EPOCH_KEY_NUMBER))
    }

    pub const fn app_group_master_key_id(&self) -> KeyId {
        Self(KeyType::AppGroupMaster as u32 | (self.0 & Self::MASK_GROUP_LOCAL_NUMBER))
    }

    pub const fn app_group_local_number(&self) -> u8 {
        (self.0 & Self::MASK_GROUP_LOCAL_NUMBER) as u8
    }

    /// Narrow to the 16-bit form carried in message headers and serialized sessions.
    pub fn to_u16(&self) -> Option<u16> {
        u16::try_from(self.0).ok()
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({:08X})", self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl From<u16> for KeyId {
    fn from(id: u16) -> Self {
        Self(id as u32)
    }
}

/// Opaque identity of a transport connection.
///
/// Only compared for equality; the connection itself lives elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        let id = NodeId(0x18B4_3000_0000_0042);
        assert_eq!(format!("{}", id), "18B4300000000042");
        assert!(format!("{:?}", id).starts_with("NodeId("));
    }

    #[test]
    fn test_node_id_peer_identity() {
        assert!(!NodeId::NOT_SPECIFIED.is_peer_identity());
        assert!(!NodeId::ANY.is_peer_identity());
        assert!(NodeId(1).is_peer_identity());
    }

    #[test]
    fn test_session_key_id_namespace() {
        let id = KeyId::make_session_key_id(0xFABC);
        assert_eq!(id.value(), 0x2ABC);
        assert!(id.is_session_key());
        assert!(!id.is_app_group_key());
        assert_eq!(id.key_type(), Some(KeyType::Session));
        assert_eq!(id.to_u16(), Some(0x2ABC));
    }

    #[test]
    fn test_fabric_secret_key_id() {
        assert_eq!(KeyId::FABRIC_SECRET.value(), 0x1001);
        assert_eq!(KeyId::FABRIC_SECRET.key_type(), Some(KeyType::General));
    }

    #[test]
    fn test_app_key_id_components() {
        let master = KeyId::make_group_master_key_id(0x25);
        let epoch = KeyId::make_epoch_key_id(3);
        let id = KeyId::make_app_rotating_key_id(KeyId::SERVICE_ROOT_KEY, epoch, master, true);

        assert!(id.is_app_rotating_key());
        assert!(id.is_app_group_key());
        assert!(id.uses_current_epoch_key());
        assert_eq!(id.root_key_id(), KeyId::SERVICE_ROOT_KEY);
        assert_eq!(id.epoch_key_id(), epoch);
        assert_eq!(id.app_group_master_key_id(), master);
        assert_eq!(id.app_group_local_number(), 0x25);
        assert_eq!(id.key_type(), Some(KeyType::AppRotating));

        let id = KeyId::make_app_static_key_id(KeyId::FABRIC_ROOT_KEY, master);
        assert_eq!(id.value(), 0x4025);
        assert!(id.is_app_static_key());
    }

    #[test]
    fn test_ids_serialize_as_integers() {
        assert_eq!(serde_json::to_string(&NodeId(5)).unwrap(), "5");
        let id: KeyId = serde_json::from_str("8193").unwrap();
        assert_eq!(id, KeyId::make_session_key_id(1));
    }

    #[test]
    fn test_unknown_key_type() {
        assert_eq!(KeyId(0x7000).key_type(), None);
    }

    #[test]
    fn test_fabric_id_assignable() {
        assert!(!FabricId::is_assignable(0));
        assert!(!FabricId::is_assignable(FabricId::RESERVED_START));
        assert!(!FabricId::is_assignable(u64::MAX));
        assert!(FabricId::is_assignable(FabricId::RESERVED_START - 1));
        assert_eq!(FabricId(0x1234_5678_9ABC_DEF0).ipv6_global_id(), 0x78_9ABC_DEF0);
    }
}
