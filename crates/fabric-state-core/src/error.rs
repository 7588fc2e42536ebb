//! Error types for fabric state.

use thiserror::Error;

/// Errors returned by fabric and session state operations.
///
/// Every failure is recoverable by the caller; nothing in this workspace aborts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FabricError {
    /// Operation invalid for the current lifecycle phase (double init, double join).
    #[error("incorrect state")]
    IncorrectState,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("invalid key id")]
    InvalidKeyId,

    #[error("duplicate key id")]
    DuplicateKeyId,

    /// No free slot in a fixed-capacity table.
    #[error("too many keys")]
    TooManyKeys,

    #[error("key not found")]
    KeyNotFound,

    #[error("wrong key type")]
    WrongKeyType,

    #[error("wrong encryption type")]
    WrongEncryptionType,

    #[error("unsupported encryption type")]
    UnsupportedEncryptionType,

    #[error("session key suspended")]
    SessionKeySuspended,

    /// Session bound to another connection, or auth mode does not permit the use.
    #[error("invalid use of session key")]
    InvalidUseOfSessionKey,

    #[error("buffer too small")]
    BufferTooSmall,

    #[error("too many shared session end nodes")]
    TooManySharedSessionEndNodes,

    #[error("unknown key type")]
    UnknownKeyType,

    /// Malformed serialized structure.
    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("random source failure: {0}")]
    RandomSource(String),

    #[error("counter storage failure: {0}")]
    CounterStorage(String),

    #[error("key store failure: {0}")]
    KeyStore(String),

    #[error("timer failure: {0}")]
    Timer(String),
}

/// Result type for fabric state operations.
pub type Result<T> = std::result::Result<T, FabricError>;
