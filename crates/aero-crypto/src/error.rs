//! Error types for the secret-key primitives.

use thiserror::Error;

/// Errors produced by the passphrase-derived and data-encryption keys.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The supplied passphrase does not authenticate against the stored
    /// verifier.
    #[error("invalid passphrase")]
    WrongPassphrase,

    /// Encryption or authenticated decryption failed.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Marshalled key parameters are malformed.
    #[error("malformed key parameters: {0}")]
    Params(String),
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
