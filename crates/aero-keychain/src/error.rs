//! Keychain error types.

use thiserror::Error;

/// Errors produced by extended-key and address operations.
#[derive(Error, Debug)]
pub enum KeychainError {
    /// The key derived at this child index is outside the valid range.  Per
    /// BIP0032 this happens with negligible probability; the child slot is
    /// simply unused and the caller should move on to the next index.
    #[error("the extended key at this index is invalid")]
    InvalidChild,

    /// Hardened children cannot be derived from a public extended key.
    #[error("cannot derive a hardened child from a public extended key")]
    DeriveHardenedFromPublic,

    /// The master seed cannot produce a valid key.
    #[error("the provided seed is unusable")]
    UnusableSeed,

    /// The seed is outside the allowed length range.
    #[error("seed must be between 16 and 64 bytes")]
    InvalidSeedLen,

    /// A private key was requested from a public extended key.
    #[error("a public extended key cannot produce a private key")]
    NotPrivate,

    /// A serialized key, address, or WIF string failed to decode.
    #[error("decode failure: {0}")]
    Decode(String),

    /// The encoded data carries a version tag for a different network.
    #[error("wrong network: {0}")]
    WrongNet(String),

    /// The HMAC underlying key derivation failed to initialise.
    #[error("hmac operation failed")]
    Hmac,

    /// An elliptic-curve operation failed unexpectedly.
    #[error("secp256k1 failure: {0}")]
    Secp(String),
}

/// Result type for keychain operations.
pub type KeychainResult<T> = Result<T, KeychainError>;
