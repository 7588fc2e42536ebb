//! Application group message keys.

use fabric_state_core::crypto::aes128ctr_sha1;
use fabric_state_core::{EncryptionKey, EncryptionType, FabricError, KeyId, Result};
use zeroize::Zeroizing;

use crate::key_store::GroupKeyStore;

/// Diversifier prefix for message encryption application keys; the
/// encryption type byte follows it.
pub const MSG_ENC_APP_KEY_DIVERSIFIER: [u8; 4] = [0xB1, 0x1D, 0xAE, 0x5B];

/// Derive the message encryption key `key_id` for `enc_type` into `out`.
///
/// Returns the global id of the key's application group.
pub fn derive_msg_enc_app_key<S: GroupKeyStore + ?Sized>(
    store: &S,
    key_id: KeyId,
    enc_type: EncryptionType,
    out: &mut EncryptionKey,
) -> Result<u32> {
    if enc_type != EncryptionType::Aes128CtrSha1 {
        return Err(FabricError::UnsupportedEncryptionType);
    }

    let mut diversifier = [0u8; 5];
    diversifier[..4].copy_from_slice(&MSG_ENC_APP_KEY_DIVERSIFIER);
    diversifier[4] = enc_type.to_u8();

    let mut key_data = Zeroizing::new([0u8; aes128ctr_sha1::KEY_SIZE]);
    let app_group_global_id = store.derive_application_key(key_id, &[], &diversifier, &mut key_data[..])?;
    *out = EncryptionKey::from_bytes(*key_data);
    Ok(app_group_global_id)
}

/// Message encryption key id for traffic to an application group.
///
/// Rotating keys always request the current epoch key.
pub fn msg_enc_key_id_for_app_group<S: GroupKeyStore + ?Sized>(
    store: &S,
    app_group_global_id: u32,
    root_key_id: KeyId,
    use_rotating_key: bool,
) -> Result<KeyId> {
    let master_key_id = store.app_group_master_key_id(app_group_global_id)?;
    Ok(if use_rotating_key {
        KeyId::make_app_rotating_key_id(root_key_id, KeyId::make_epoch_key_id(0), master_key_id, true)
    } else {
        KeyId::make_app_static_key_id(root_key_id, master_key_id)
    })
}

/// Check that a message key belongs to an application group.
///
/// Fails with `WrongKeyType` unless `key_id` is an application key derived
/// from `root_key_id` and the group's master key, and is rotating when
/// `require_rotating_key` is set.
pub fn check_msg_enc_for_app_group<S: GroupKeyStore + ?Sized>(
    store: &S,
    key_id: KeyId,
    app_group_global_id: u32,
    root_key_id: KeyId,
    require_rotating_key: bool,
) -> Result<()> {
    if !key_id.is_app_group_key()
        || key_id.root_key_id() != root_key_id
        || (require_rotating_key && !key_id.is_app_rotating_key())
    {
        return Err(FabricError::WrongKeyType);
    }
    let expected_master = store.app_group_master_key_id(app_group_global_id)?;
    if key_id.app_group_master_key_id() != expected_master {
        return Err(FabricError::WrongKeyType);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_store::{GroupKey, MemoryKeyStore};

    const GROUP: u32 = 0xA0B0_C0D0;

    fn store() -> MemoryKeyStore {
        let mut store = MemoryKeyStore::new();
        store.store_group_key(GroupKey::new(KeyId::FABRIC_SECRET, &[9; 36]).unwrap()).unwrap();
        store.store_group_key(GroupKey::new(KeyId::SERVICE_ROOT_KEY, &[8; 32]).unwrap()).unwrap();
        store.store_group_key(GroupKey::new(KeyId::make_epoch_key_id(1), &[7; 32]).unwrap()).unwrap();
        store.set_current_epoch_key(KeyId::make_epoch_key_id(1)).unwrap();
        store
            .store_group_key(
                GroupKey::new(KeyId::make_group_master_key_id(3), &[6; 32])
                    .unwrap()
                    .with_app_group_global_id(GROUP),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_derive_uses_diversifier() {
        let store = store();
        let key_id = KeyId::make_app_static_key_id(KeyId::FABRIC_ROOT_KEY, KeyId::make_group_master_key_id(3));

        let mut key = EncryptionKey::zeroed();
        assert_eq!(derive_msg_enc_app_key(&store, key_id, EncryptionType::Aes128CtrSha1, &mut key), Ok(GROUP));
        assert!(!key.is_zero());

        let mut raw = [0u8; 36];
        store
            .derive_application_key(key_id, &[], &[0xB1, 0x1D, 0xAE, 0x5B, 0x01], &mut raw)
            .unwrap();
        assert_eq!(key.as_bytes(), &raw);
    }

    #[test]
    fn test_derive_rejects_unencrypted() {
        let store = store();
        let key_id = KeyId::make_app_static_key_id(KeyId::FABRIC_ROOT_KEY, KeyId::make_group_master_key_id(3));
        let mut key = EncryptionKey::zeroed();
        assert_eq!(
            derive_msg_enc_app_key(&store, key_id, EncryptionType::None, &mut key),
            Err(FabricError::UnsupportedEncryptionType)
        );
    }

    #[test]
    fn test_key_id_for_app_group() {
        let store = store();
        let fixed = msg_enc_key_id_for_app_group(&store, GROUP, KeyId::SERVICE_ROOT_KEY, false).unwrap();
        assert!(fixed.is_app_static_key());
        assert_eq!(fixed.root_key_id(), KeyId::SERVICE_ROOT_KEY);
        assert_eq!(fixed.app_group_master_key_id(), KeyId::make_group_master_key_id(3));

        let rotating = msg_enc_key_id_for_app_group(&store, GROUP, KeyId::SERVICE_ROOT_KEY, true).unwrap();
        assert!(rotating.is_app_rotating_key());
        assert!(rotating.uses_current_epoch_key());

        let mut key = EncryptionKey::zeroed();
        derive_msg_enc_app_key(&store, rotating, EncryptionType::Aes128CtrSha1, &mut key).unwrap();

        assert_eq!(
            msg_enc_key_id_for_app_group(&store, 1, KeyId::SERVICE_ROOT_KEY, false),
            Err(FabricError::KeyNotFound)
        );
    }

    #[test]
    fn test_check_msg_enc_for_app_group() {
        let store = store();
        let master = KeyId::make_group_master_key_id(3);
        let fixed = KeyId::make_app_static_key_id(KeyId::SERVICE_ROOT_KEY, master);
        let rotating =
            KeyId::make_app_rotating_key_id(KeyId::SERVICE_ROOT_KEY, KeyId::make_epoch_key_id(1), master, false);

        assert_eq!(check_msg_enc_for_app_group(&store, fixed, GROUP, KeyId::SERVICE_ROOT_KEY, false), Ok(()));
        assert_eq!(check_msg_enc_for_app_group(&store, rotating, GROUP, KeyId::SERVICE_ROOT_KEY, true), Ok(()));

        let wrong = [
            (fixed, KeyId::SERVICE_ROOT_KEY, true),
            (fixed, KeyId::CLIENT_ROOT_KEY, false),
            (KeyId::make_session_key_id(4), KeyId::SERVICE_ROOT_KEY, false),
            (
                KeyId::make_app_static_key_id(KeyId::SERVICE_ROOT_KEY, KeyId::make_group_master_key_id(4)),
                KeyId::SERVICE_ROOT_KEY,
                false,
            ),
        ];
        for (key_id, root, rotating_required) in wrong {
            assert_eq!(
                check_msg_enc_for_app_group(&store, key_id, GROUP, root, rotating_required),
                Err(FabricError::WrongKeyType),
                "{:?}",
                key_id
            );
        }
    }
}
