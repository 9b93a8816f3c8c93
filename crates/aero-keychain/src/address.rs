//! Address types and base58check encoding.

use crate::base58;
use crate::{hash160, KeychainError, KeychainResult, NetParams};

/// Length in bytes of a hash160 address payload.
pub const HASH160_SIZE: usize = 20;

/// A wallet address.
///
/// Raw public keys are accepted as an address form so callers can use a
/// pubkey and its pay-to-pubkey-hash form interchangeably; the manager
/// reduces them to [`Address::PubKeyHash`] with [`Address::normalize`] before
/// any lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// Pay-to-pubkey-hash.
    PubKeyHash {
        /// hash160 of the serialized public key.
        hash: [u8; HASH160_SIZE],
        /// Network version byte.
        addr_id: u8,
    },
    /// Pay-to-script-hash.
    ScriptHash {
        /// hash160 of the redeem script.
        hash: [u8; HASH160_SIZE],
        /// Network version byte.
        addr_id: u8,
    },
    /// A raw serialized public key.
    PubKey {
        /// Compressed or uncompressed serialized public key.
        key: Vec<u8>,
        /// Network version byte of the corresponding P2PKH address.
        addr_id: u8,
    },
}

impl Address {
    /// Build a pay-to-pubkey-hash address.
    pub fn p2pkh(hash: [u8; HASH160_SIZE], params: &NetParams) -> Self {
        Address::PubKeyHash {
            hash,
            addr_id: params.p2pkh_addr_id,
        }
    }

    /// Build a pay-to-script-hash address.
    pub fn p2sh(hash: [u8; HASH160_SIZE], params: &NetParams) -> Self {
        Address::ScriptHash {
            hash,
            addr_id: params.p2sh_addr_id,
        }
    }

    /// Build an address from a serialized public key.
    pub fn from_pubkey(key: Vec<u8>, params: &NetParams) -> Self {
        Address::PubKey {
            key,
            addr_id: params.p2pkh_addr_id,
        }
    }

    /// Reduce a pubkey address to its pay-to-pubkey-hash form.  Hash
    /// addresses are returned unchanged.
    pub fn normalize(&self) -> Address {
        match self {
            Address::PubKey { key, addr_id } => Address::PubKeyHash {
                hash: hash160(key),
                addr_id: *addr_id,
            },
            other => other.clone(),
        }
    }

    /// The 20-byte hash identifying this address in the manager.
    pub fn hash160(&self) -> [u8; HASH160_SIZE] {
        match self {
            Address::PubKeyHash { hash, .. } | Address::ScriptHash { hash, .. } => *hash,
            Address::PubKey { key, .. } => hash160(key),
        }
    }

    /// Whether this address carries the given network's version byte.
    pub fn is_for_net(&self, params: &NetParams) -> bool {
        match self {
            Address::PubKeyHash { addr_id, .. } | Address::PubKey { addr_id, .. } => {
                *addr_id == params.p2pkh_addr_id
            }
            Address::ScriptHash { addr_id, .. } => *addr_id == params.p2sh_addr_id,
        }
    }

    /// Encode as a base58check string.  Pubkey addresses encode as their
    /// P2PKH form.
    pub fn encode(&self) -> String {
        let normalized = self.normalize();
        let (hash, addr_id) = match &normalized {
            Address::PubKeyHash { hash, addr_id } | Address::ScriptHash { hash, addr_id } => {
                (hash, *addr_id)
            }
            Address::PubKey { .. } => unreachable!("normalize removes the pubkey form"),
        };
        let mut payload = Vec::with_capacity(1 + HASH160_SIZE);
        payload.push(addr_id);
        payload.extend_from_slice(hash);
        base58::check_encode(&payload)
    }

    /// Decode a base58check address string, validating the version byte
    /// against the given network.
    pub fn decode(s: &str, params: &NetParams) -> KeychainResult<Address> {
        let payload = base58::check_decode(s)?;
        if payload.len() != 1 + HASH160_SIZE {
            return Err(KeychainError::Decode(format!(
                "address payload must be {} bytes, got {}",
                1 + HASH160_SIZE,
                payload.len()
            )));
        }
        let mut hash = [0u8; HASH160_SIZE];
        hash.copy_from_slice(&payload[1..]);

        if payload[0] == params.p2pkh_addr_id {
            Ok(Address::PubKeyHash {
                hash,
                addr_id: payload[0],
            })
        } else if payload[0] == params.p2sh_addr_id {
            Ok(Address::ScriptHash {
                hash,
                addr_id: payload[0],
            })
        } else {
            Err(KeychainError::WrongNet(format!(
                "address version {:#04x} is not for {}",
                payload[0], params.name
            )))
        }
    }
}
