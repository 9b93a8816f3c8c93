//! # aero-keychain
//!
//! Hierarchical deterministic key arithmetic and address encoding for the
//! Aero wallet.
//!
//! This crate provides:
//! - [`ExtendedKey`]: BIP0032 extended private/public keys with hardened and
//!   normal child derivation, neutering, and base58check serialization
//! - [`Address`]: pay-to-pubkey-hash and pay-to-script-hash addresses with
//!   base58check encoding and pubkey normalisation
//! - [`Wif`]: the wallet import format codec for raw private keys
//! - [`NetParams`]: per-network version bytes and the BIP0044 coin type
//!
//! Child derivation can fail for roughly 1 in 2^127 indexes as described by
//! BIP0032; such indexes surface as [`KeychainError::InvalidChild`] and the
//! caller is expected to skip the child slot.

mod address;
mod base58;
mod error;
mod extended_key;
mod params;
mod wif;

pub use address::{Address, HASH160_SIZE};
pub use error::{KeychainError, KeychainResult};
pub use extended_key::{
    ExtendedKey, HARDENED_KEY_START, MAX_SEED_BYTES, MIN_SEED_BYTES,
};
pub use params::{NetParams, MAINNET, TESTNET};
pub use wif::Wif;

use bitcoin_hashes::{hash160, Hash};

/// RIPEMD160(SHA256(data)), the 20-byte hash used for both P2PKH and P2SH
/// addresses.
pub fn hash160(data: &[u8]) -> [u8; HASH160_SIZE] {
    let hash = hash160::Hash::hash(data);
    let mut out = [0u8; HASH160_SIZE];
    out.copy_from_slice(&hash[..]);
    out
}
