//! Fabric configuration encoding.
//!
//! The configuration carries the fabric id and the fabric secret, and is
//! what a node hands to another node joining its fabric. It uses the same
//! tag-ordered encoding as suspended sessions.

use fabric_state_core::{
    EncryptionKey, EncryptionType, FabricError, FabricId, KeyId, Result, Tag, TagReader, TagWriter,
};
use zeroize::Zeroize;

/// Structure tag of a fabric configuration.
pub const FABRIC_CONFIG_STRUCTURE: u64 = 0x4643;

/// Fabric keys are shared with every fabric node.
pub const KEY_SCOPE_ALL: u8 = 0;

/// Only fixed keys are supported.
pub const ROTATION_SCHEME_NONE: u8 = 0;

mod field {
    pub const FABRIC_ID: u64 = 1;
    pub const FABRIC_KEYS: u64 = 2;
}

mod key_field {
    pub const FABRIC_KEY_ID: u64 = 1;
    pub const ENCRYPTION_TYPE: u64 = 2;
    pub const DATA_KEY: u64 = 3;
    pub const INTEGRITY_KEY: u64 = 4;
    pub const KEY_SCOPE: u64 = 5;
    pub const ROTATION_SCHEME: u64 = 6;
}

/// Encoded size of a fabric configuration.
pub const FABRIC_CONFIG_LEN: usize = 3 + 1 + 10 + 2 + 1 + 4 + 2 + 18 + 22 + 2 + 2;

/// A decoded fabric configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricConfig {
    pub fabric_id: FabricId,
    pub fabric_secret: EncryptionKey,
}

/// Encode a fabric configuration into `buf`; on failure `buf` is zeroed.
pub fn encode_fabric_config(fabric_id: FabricId, fabric_secret: &EncryptionKey, buf: &mut [u8]) -> Result<usize> {
    let result = write(fabric_id, fabric_secret, buf);
    if result.is_err() {
        buf.zeroize();
    }
    result
}

fn write(fabric_id: FabricId, fabric_secret: &EncryptionKey, buf: &mut [u8]) -> Result<usize> {
    let key_id = KeyId::FABRIC_SECRET.to_u16().ok_or(FabricError::InvalidKeyId)?;

    let mut w = TagWriter::new(buf);
    w.start_structure(Tag::Profile(FABRIC_CONFIG_STRUCTURE), 2)?;
    w.put_uint(Tag::Context(field::FABRIC_ID), fabric_id.value())?;
    w.start_array(Tag::Context(field::FABRIC_KEYS), 1)?;
    w.start_structure(Tag::Anonymous, 6)?;
    w.put_uint(Tag::Context(key_field::FABRIC_KEY_ID), key_id as u64)?;
    w.put_uint(
        Tag::Context(key_field::ENCRYPTION_TYPE),
        EncryptionType::Aes128CtrSha1.to_u8() as u64,
    )?;
    w.put_bytes(Tag::Context(key_field::DATA_KEY), fabric_secret.data_key())?;
    w.put_bytes(Tag::Context(key_field::INTEGRITY_KEY), fabric_secret.integrity_key())?;
    w.put_uint(Tag::Context(key_field::KEY_SCOPE), KEY_SCOPE_ALL as u64)?;
    w.put_uint(Tag::Context(key_field::ROTATION_SCHEME), ROTATION_SCHEME_NONE as u64)?;
    w.end_container()?;
    w.end_container()?;
    w.end_container()?;
    w.finish()
}

/// Decode a fabric configuration.
///
/// Exactly one fabric key is accepted. It must be the fabric secret, use a
/// supported encryption type, be scoped to all nodes and not rotate.
pub fn decode_fabric_config(buf: &[u8]) -> Result<FabricConfig> {
    let mut r = TagReader::new(buf);
    r.enter_structure(Tag::Profile(FABRIC_CONFIG_STRUCTURE))?;
    let fabric_id = FabricId(r.read_uint(Tag::Context(field::FABRIC_ID))?);

    if r.enter_array(Tag::Context(field::FABRIC_KEYS))? != 1 {
        return Err(FabricError::InvalidArgument);
    }
    r.enter_structure(Tag::Anonymous)?;

    let key_id = KeyId::from(r.read_uint::<u16>(Tag::Context(key_field::FABRIC_KEY_ID))?);
    if key_id != KeyId::FABRIC_SECRET {
        return Err(FabricError::InvalidKeyId);
    }
    let enc_type = EncryptionType::from_u8(r.read_uint(Tag::Context(key_field::ENCRYPTION_TYPE))?);
    if enc_type != Some(EncryptionType::Aes128CtrSha1) {
        return Err(FabricError::UnsupportedEncryptionType);
    }
    let data_key = r.read_bytes(Tag::Context(key_field::DATA_KEY))?;
    let integrity_key = r.read_bytes(Tag::Context(key_field::INTEGRITY_KEY))?;
    let fabric_secret = EncryptionKey::from_parts(data_key, integrity_key)?;
    if r.read_uint::<u8>(Tag::Context(key_field::KEY_SCOPE))? != KEY_SCOPE_ALL {
        return Err(FabricError::InvalidArgument);
    }
    if r.read_uint::<u8>(Tag::Context(key_field::ROTATION_SCHEME))? != ROTATION_SCHEME_NONE {
        return Err(FabricError::InvalidArgument);
    }

    r.exit_container()?;
    r.exit_container()?;
    r.exit_container()?;
    r.finish()?;

    Ok(FabricConfig { fabric_id, fabric_secret })
}
