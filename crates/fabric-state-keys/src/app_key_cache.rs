//! Cache of derived application message keys.
//!
//! Fixed capacity. When full, the least recently used key is wiped and its
//! slot reused.

use fabric_state_core::{EncryptionKey, EncryptionType, FabricError, KeyId, MessageEncryptionKey, Result};
use tracing::trace;

#[derive(Debug)]
pub struct AppKeyCache {
    entries: Box<[MessageEncryptionKey]>,
    /// Slot indices, most recently used first.
    mru: Vec<usize>,
}

impl AppKeyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| MessageEncryptionKey::default()).collect(),
            mru: (0..capacity).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.key_id != KeyId::NONE).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key_id: KeyId, enc_type: EncryptionType) -> bool {
        self.position(key_id, enc_type).is_some()
    }

    /// Cached key for `key_id` and `enc_type`, deriving it on a miss.
    ///
    /// `derive` fills the key material of a newly claimed slot. If it fails
    /// the slot is left empty and the error returned.
    pub fn get_or_derive<F>(
        &mut self,
        key_id: KeyId,
        enc_type: EncryptionType,
        derive: F,
    ) -> Result<&MessageEncryptionKey>
    where
        F: FnOnce(&mut EncryptionKey) -> Result<()>,
    {
        if key_id == KeyId::NONE {
            return Err(FabricError::InvalidKeyId);
        }

        let index = match self.position(key_id, enc_type) {
            Some(index) => index,
            None => {
                let index = self
                    .entries
                    .iter()
                    .position(|e| e.key_id == KeyId::NONE)
                    .or_else(|| self.mru.last().copied())
                    .ok_or(FabricError::TooManyKeys)?;
                let entry = &mut self.entries[index];
                entry.clear();
                if let Err(e) = derive(&mut entry.key) {
                    entry.clear();
                    return Err(e);
                }
                entry.key_id = key_id;
                entry.enc_type = enc_type;
                trace!(key_id = %key_id, slot = index, "Cached application key");
                index
            }
        };

        self.promote(index);
        Ok(&self.entries[index])
    }

    /// Wipe every cached key.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(MessageEncryptionKey::clear);
    }

    fn position(&self, key_id: KeyId, enc_type: EncryptionType) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.key_id != KeyId::NONE && e.key_id == key_id && e.enc_type == enc_type)
    }

    fn promote(&mut self, index: usize) {
        if let Some(pos) = self.mru.iter().position(|&i| i == index) {
            self.mru[..=pos].rotate_right(1);
        }
    }
}
