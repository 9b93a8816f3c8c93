//! # aero-crypto
//!
//! Secret-key primitives for the Aero wallet.
//!
//! This crate provides the two encryption tiers used to protect key material
//! at rest:
//! - [`SecretKey`]: a master key derived from a passphrase with scrypt.  Its
//!   cost parameters, salt, and a verifier digest are persisted so the same
//!   key can be re-derived later, and a wrong passphrase is detected without
//!   attempting a decryption.
//! - [`CryptoKey`]: a randomly generated 32-byte data-encryption key.
//!
//! Master keys wrap the data-encryption keys; the data-encryption keys wrap
//! the actual key material and scripts.  Splitting the tiers keeps passphrase
//! changes cheap: only the wrapped data-encryption keys are re-encrypted.
//!
//! All ciphertexts are authenticated (AES-256-GCM) with a random nonce
//! prepended, so decryption with the wrong key or of tampered data fails
//! cleanly instead of yielding garbage.

mod crypto_key;
mod error;
mod secret_key;

pub use crypto_key::{CryptoKey, KEY_SIZE, NONCE_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use secret_key::{
    ScryptOptions, SecretKey, SecretKeyParams, MARSHALLED_PARAMS_SIZE, SALT_SIZE,
};
