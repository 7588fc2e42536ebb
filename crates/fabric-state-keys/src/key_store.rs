//! Group key store contract and an in-memory store.
//!
//! The store holds the fabric secret, application root keys, epoch keys and
//! application group master keys, and derives application message keys from
//! them. Derived keys never leave the caller's buffer.

use fabric_state_core::{KeyId, KeyType};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyStoreError, Result};

/// Largest secret a [`GroupKey`] holds.
pub const MAX_GROUP_KEY_SIZE: usize = 36;

const FABRIC_ROOT_KEY_CONTEXT: &str = "fabric-state 2024-06-01 fabric root key";
const APP_KEY_CONTEXT: &str = "fabric-state 2024-06-01 application group key";

/// A stored group key. The secret is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GroupKey {
    #[zeroize(skip)]
    key_id: KeyId,
    #[zeroize(skip)]
    app_group_global_id: u32,
    len: usize,
    secret: [u8; MAX_GROUP_KEY_SIZE],
}

impl GroupKey {
    pub fn new(key_id: KeyId, secret: &[u8]) -> Result<Self> {
        if secret.is_empty() || secret.len() > MAX_GROUP_KEY_SIZE {
            return Err(KeyStoreError::InvalidKeyLength(secret.len()));
        }
        let mut key = Self {
            key_id,
            app_group_global_id: 0,
            len: secret.len(),
            secret: [0; MAX_GROUP_KEY_SIZE],
        };
        key.secret[..secret.len()].copy_from_slice(secret);
        Ok(key)
    }

    /// Attach the global id of the application group a master key belongs to.
    pub fn with_app_group_global_id(mut self, global_id: u32) -> Self {
        self.app_group_global_id = global_id;
        self
    }

    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    pub fn app_group_global_id(&self) -> u32 {
        self.app_group_global_id
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret[..self.len]
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupKey")
            .field("key_id", &self.key_id)
            .field("app_group_global_id", &self.app_group_global_id)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Persistent store of group keys.
pub trait GroupKeyStore {
    /// Store a key, replacing any key with the same id.
    fn store_group_key(&mut self, key: GroupKey) -> Result<()>;

    fn retrieve_group_key(&self, key_id: KeyId) -> Result<GroupKey>;

    /// Derive the application key `key_id` into `out`.
    ///
    /// Returns the global id of the application group whose master key was used.
    fn derive_application_key(
        &self,
        key_id: KeyId,
        salt: &[u8],
        diversifier: &[u8],
        out: &mut [u8],
    ) -> Result<u32>;

    /// Master key id of the application group with this global id.
    fn app_group_master_key_id(&self, app_group_global_id: u32) -> Result<KeyId>;

    /// Remove every stored key.
    fn clear(&mut self) -> Result<()>;
}

/// Keys held in process memory.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Vec<GroupKey>,
    current_epoch_key: Option<KeyId>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Select the epoch key used by keys that request the current epoch.
    pub fn set_current_epoch_key(&mut self, epoch_key: KeyId) -> Result<()> {
        if epoch_key.key_type() != Some(KeyType::AppEpoch) {
            return Err(KeyStoreError::InvalidKeyId(epoch_key));
        }
        self.current_epoch_key = Some(epoch_key);
        Ok(())
    }

    fn find(&self, key_id: KeyId) -> Result<&GroupKey> {
        self.keys
            .iter()
            .find(|k| k.key_id == key_id)
            .ok_or(KeyStoreError::KeyNotFound(key_id))
    }

    fn fabric_root_key(&self) -> Result<GroupKey> {
        let fabric_secret = self.find(KeyId::FABRIC_SECRET)?;
        let mut root = [0u8; 32];
        let mut hasher = blake3::Hasher::new_derive_key(FABRIC_ROOT_KEY_CONTEXT);
        hasher.update(fabric_secret.secret());
        hasher.finalize_xof().fill(&mut root);
        let key = GroupKey::new(KeyId::FABRIC_ROOT_KEY, &root);
        root.zeroize();
        key
    }
}

impl GroupKeyStore for MemoryKeyStore {
    fn store_group_key(&mut self, key: GroupKey) -> Result<()> {
        let storable = key.key_id == KeyId::FABRIC_SECRET
            || (matches!(
                key.key_id.key_type(),
                Some(KeyType::AppRoot | KeyType::AppEpoch | KeyType::AppGroupMaster)
            ) && key.key_id != KeyId::FABRIC_ROOT_KEY);
        if !storable {
            return Err(KeyStoreError::InvalidKeyId(key.key_id));
        }
        self.keys.retain(|k| k.key_id != key.key_id);
        self.keys.push(key);
        Ok(())
    }

    fn retrieve_group_key(&self, key_id: KeyId) -> Result<GroupKey> {
        if key_id == KeyId::FABRIC_ROOT_KEY {
            return self.fabric_root_key();
        }
        self.find(key_id).cloned()
    }

    fn derive_application_key(
        &self,
        key_id: KeyId,
        salt: &[u8],
        diversifier: &[u8],
        out: &mut [u8],
    ) -> Result<u32> {
        if !key_id.is_app_group_key() {
            return Err(KeyStoreError::InvalidKeyId(key_id));
        }

        let root = self.retrieve_group_key(key_id.root_key_id())?;
        let master = self.find(key_id.app_group_master_key_id())?;

        let mut hasher = blake3::Hasher::new_derive_key(APP_KEY_CONTEXT);
        hasher.update(root.secret());
        if key_id.is_app_rotating_key() {
            let epoch_id = if key_id.uses_current_epoch_key() {
                self.current_epoch_key.ok_or(KeyStoreError::KeyNotFound(key_id.epoch_key_id()))?
            } else {
                key_id.epoch_key_id()
            };
            hasher.update(self.find(epoch_id)?.secret());
        }
        hasher.update(master.secret());
        hasher.update(salt);
        hasher.update(diversifier);
        hasher.finalize_xof().fill(out);

        Ok(master.app_group_global_id)
    }

    fn app_group_master_key_id(&self, app_group_global_id: u32) -> Result<KeyId> {
        self.keys
            .iter()
            .find(|k| {
                k.key_id.key_type() == Some(KeyType::AppGroupMaster)
                    && k.app_group_global_id == app_group_global_id
            })
            .map(|k| k.key_id)
            .ok_or(KeyStoreError::UnknownAppGroup(app_group_global_id))
    }

    fn clear(&mut self) -> Result<()> {
        self.keys.clear();
        self.current_epoch_key = None;
        Ok(())
    }
}
