//! Wallet import format (WIF) codec for raw private keys.

use secp256k1::{PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroize;

use crate::base58;
use crate::{hash160, Address, KeychainError, KeychainResult, NetParams, HASH160_SIZE};

/// A private key in wallet import format: a network flag, the key scalar,
/// and whether the corresponding public key serializes compressed.
#[derive(Debug, Clone)]
pub struct Wif {
    priv_key: SecretKey,
    compressed: bool,
    wif_id: u8,
}

impl Wif {
    /// Wrap a private key for the given network.
    pub fn new(priv_key: SecretKey, compressed: bool, params: &NetParams) -> Self {
        Self {
            priv_key,
            compressed,
            wif_id: params.wif_id,
        }
    }

    /// Decode a WIF string.  The network flag is preserved as decoded; use
    /// [`Wif::is_for_net`] to validate it.
    pub fn decode(s: &str) -> KeychainResult<Wif> {
        let mut payload = base58::check_decode(s)?;
        let compressed = match payload.len() {
            33 => false,
            34 if payload[33] == 0x01 => true,
            34 => {
                payload.zeroize();
                return Err(KeychainError::Decode(
                    "invalid compression flag in WIF".into(),
                ));
            }
            n => {
                payload.zeroize();
                return Err(KeychainError::Decode(format!(
                    "WIF payload must be 33 or 34 bytes, got {n}"
                )));
            }
        };
        let wif_id = payload[0];
        let priv_key = SecretKey::from_slice(&payload[1..33])
            .map_err(|_| KeychainError::Decode("invalid private key scalar in WIF".into()));
        payload.zeroize();

        Ok(Wif {
            priv_key: priv_key?,
            compressed,
            wif_id,
        })
    }

    /// Encode as a base58check WIF string.
    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(34);
        payload.push(self.wif_id);
        payload.extend_from_slice(&self.priv_key.secret_bytes());
        if self.compressed {
            payload.push(0x01);
        }
        let encoded = base58::check_encode(&payload);
        payload.zeroize();
        encoded
    }

    /// The private key scalar.
    pub fn priv_key(&self) -> &SecretKey {
        &self.priv_key
    }

    /// Whether the public key serializes compressed.
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// Whether this WIF carries the given network's version byte.
    pub fn is_for_net(&self, params: &NetParams) -> bool {
        self.wif_id == params.wif_id
    }

    /// Serialize the public key, honoring the compression flag.
    pub fn serialized_pubkey(&self) -> Vec<u8> {
        let secp = Secp256k1::new();
        let pubkey = PublicKey::from_secret_key(&secp, &self.priv_key);
        if self.compressed {
            pubkey.serialize().to_vec()
        } else {
            pubkey.serialize_uncompressed().to_vec()
        }
    }

    /// The hash160 of the serialized public key.
    pub fn pubkey_hash(&self) -> [u8; HASH160_SIZE] {
        hash160(&self.serialized_pubkey())
    }

    /// The pay-to-pubkey-hash address for this key.
    pub fn address(&self, params: &NetParams) -> Address {
        Address::p2pkh(self.pubkey_hash(), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAINNET, TESTNET};

    // Well-known encoding of the scalar 1 with the compressed flag set.
    const ONE_WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";
    const ONE_ADDR: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

    #[test]
    fn test_decode_known_vector() {
        let wif = Wif::decode(ONE_WIF).unwrap();
        assert!(wif.compressed());
        assert!(wif.is_for_net(&MAINNET));
        assert!(!wif.is_for_net(&TESTNET));

        let mut scalar = [0u8; 32];
        scalar[31] = 1;
        assert_eq!(wif.priv_key().secret_bytes(), scalar);
        assert_eq!(wif.address(&MAINNET).encode(), ONE_ADDR);
    }

    #[test]
    fn test_encode_roundtrip() {
        let wif = Wif::decode(ONE_WIF).unwrap();
        assert_eq!(wif.encode(), ONE_WIF);

        let uncompressed = Wif::new(*wif.priv_key(), false, &MAINNET);
        let reparsed = Wif::decode(&uncompressed.encode()).unwrap();
        assert!(!reparsed.compressed());
        assert_eq!(reparsed.priv_key(), wif.priv_key());
    }

    #[test]
    fn test_pubkey_serialization_length() {
        let wif = Wif::decode(ONE_WIF).unwrap();
        assert_eq!(wif.serialized_pubkey().len(), 33);

        let uncompressed = Wif::new(*wif.priv_key(), false, &MAINNET);
        assert_eq!(uncompressed.serialized_pubkey().len(), 65);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Wif::decode("not a wif").is_err());
        // Valid base58check but wrong payload size.
        let short = crate::base58::check_encode(&[0x80, 0x01]);
        assert!(Wif::decode(&short).is_err());
    }
}
