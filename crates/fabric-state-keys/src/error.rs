//! Error types for the group key store.

use fabric_state_core::{FabricError, KeyId};
use thiserror::Error;

/// Errors returned by a [`GroupKeyStore`](crate::GroupKeyStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyStoreError {
    /// No key with this id is stored.
    #[error("group key not found: {0}")]
    KeyNotFound(KeyId),

    /// The id does not name a key the store can hold or derive from.
    #[error("invalid group key id: {0}")]
    InvalidKeyId(KeyId),

    #[error("unsupported encryption type: {0:#04x}")]
    UnsupportedEncryptionType(u8),

    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),

    /// No application group has this global id.
    #[error("unknown application group: {0:08X}")]
    UnknownAppGroup(u32),

    /// Backend failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<KeyStoreError> for FabricError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::KeyNotFound(_) | KeyStoreError::UnknownAppGroup(_) => FabricError::KeyNotFound,
            KeyStoreError::InvalidKeyId(_) => FabricError::InvalidKeyId,
            KeyStoreError::UnsupportedEncryptionType(_) => FabricError::UnsupportedEncryptionType,
            KeyStoreError::InvalidKeyLength(_) => FabricError::InvalidArgument,
            KeyStoreError::Storage(msg) => FabricError::KeyStore(msg),
        }
    }
}

/// Result type for key store operations.
pub type Result<T> = std::result::Result<T, KeyStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fabric_error_mapping() {
        assert_eq!(
            FabricError::from(KeyStoreError::KeyNotFound(KeyId::FABRIC_SECRET)),
            FabricError::KeyNotFound
        );
        assert_eq!(FabricError::from(KeyStoreError::InvalidKeyId(KeyId::NONE)), FabricError::InvalidKeyId);
        assert_eq!(
            FabricError::from(KeyStoreError::Storage("flash".into())),
            FabricError::KeyStore("flash".into())
        );
    }

    #[test]
    fn test_display() {
        let err = KeyStoreError::KeyNotFound(KeyId::FABRIC_SECRET);
        assert_eq!(err.to_string(), "group key not found: 1001");
    }
}
