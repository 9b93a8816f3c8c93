//! BIP0032 extended key arithmetic.

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;
use zeroize::Zeroize;

use crate::base58;
use crate::{hash160, Address, KeychainError, KeychainResult, NetParams};

/// First hardened child index.  Indexes at or above this value use hardened
/// derivation.
pub const HARDENED_KEY_START: u32 = 0x8000_0000;

/// Minimum accepted master seed length in bytes.
pub const MIN_SEED_BYTES: usize = 16;

/// Maximum accepted master seed length in bytes.
pub const MAX_SEED_BYTES: usize = 64;

/// Length of a serialized extended key before the base58check checksum:
/// version, depth, parent fingerprint, child number, chain code, key data.
const SERIALIZED_KEY_SIZE: usize = 4 + 1 + 4 + 4 + 32 + 33;

#[derive(Clone)]
enum KeyData {
    Private([u8; 32]),
    Public([u8; 33]),
}

/// A BIP0032 extended key, either private or public.
///
/// Both network version prefixes are captured at construction so a key can be
/// neutered and serialized without a parameter registry.
#[derive(Clone)]
pub struct ExtendedKey {
    priv_version: [u8; 4],
    pub_version: [u8; 4],
    depth: u8,
    parent_fp: [u8; 4],
    child_number: u32,
    chain_code: [u8; 32],
    key: KeyData,
}

impl std::fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedKey").finish_non_exhaustive()
    }
}

impl ExtendedKey {
    /// Derive a master extended private key from a seed.
    pub fn new_master(seed: &[u8], params: &NetParams) -> KeychainResult<Self> {
        if seed.len() < MIN_SEED_BYTES || seed.len() > MAX_SEED_BYTES {
            return Err(KeychainError::InvalidSeedLen);
        }

        let mut digest = hmac_sha512(b"Bitcoin seed", seed)?;
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&digest[..32]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);
        digest.zeroize();

        // The master key is unusable if IL is not a valid scalar.
        if SecretKey::from_slice(&key_bytes).is_err() {
            key_bytes.zeroize();
            return Err(KeychainError::UnusableSeed);
        }

        Ok(Self {
            priv_version: params.hd_priv_version,
            pub_version: params.hd_pub_version,
            depth: 0,
            parent_fp: [0u8; 4],
            child_number: 0,
            chain_code,
            key: KeyData::Private(key_bytes),
        })
    }

    /// Whether this key can produce private child keys and scalars.
    pub fn is_private(&self) -> bool {
        matches!(self.key, KeyData::Private(_))
    }

    /// Depth of this key below the master node.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// The child index this key was derived at.
    pub fn child_number(&self) -> u32 {
        self.child_number
    }

    /// Derive the child key at `index`.  Indexes at or above
    /// [`HARDENED_KEY_START`] are hardened and require a private parent.
    ///
    /// Fails with [`KeychainError::InvalidChild`] for the negligible fraction
    /// of indexes whose derived key falls outside the valid range; callers
    /// skip such slots.
    pub fn child(&self, index: u32) -> KeychainResult<Self> {
        let hardened = index >= HARDENED_KEY_START;
        let parent_fp = self.fingerprint()?;

        let (key, chain_code) = match &self.key {
            KeyData::Private(parent_bytes) => {
                let mut data = Vec::with_capacity(37);
                if hardened {
                    data.push(0);
                    data.extend_from_slice(parent_bytes);
                } else {
                    data.extend_from_slice(&self.pubkey_bytes()?);
                }
                data.extend_from_slice(&index.to_be_bytes());

                let digest_res = hmac_sha512(&self.chain_code, &data);
                data.zeroize();
                let mut digest = digest_res?;
                let mut il = [0u8; 32];
                il.copy_from_slice(&digest[..32]);
                let mut chain_code = [0u8; 32];
                chain_code.copy_from_slice(&digest[32..]);
                digest.zeroize();

                let tweak = match Scalar::from_be_bytes(il) {
                    Ok(t) => t,
                    Err(_) => {
                        il.zeroize();
                        return Err(KeychainError::InvalidChild);
                    }
                };
                il.zeroize();
                let parent = SecretKey::from_slice(parent_bytes)
                    .map_err(|e| KeychainError::Secp(e.to_string()))?;
                let child = parent
                    .add_tweak(&tweak)
                    .map_err(|_| KeychainError::InvalidChild)?;
                (KeyData::Private(child.secret_bytes()), chain_code)
            }
            KeyData::Public(parent_bytes) => {
                if hardened {
                    return Err(KeychainError::DeriveHardenedFromPublic);
                }
                let mut data = Vec::with_capacity(37);
                data.extend_from_slice(parent_bytes);
                data.extend_from_slice(&index.to_be_bytes());

                let digest = hmac_sha512(&self.chain_code, &data)?;
                let mut il = [0u8; 32];
                il.copy_from_slice(&digest[..32]);
                let mut chain_code = [0u8; 32];
                chain_code.copy_from_slice(&digest[32..]);

                let tweak =
                    Scalar::from_be_bytes(il).map_err(|_| KeychainError::InvalidChild)?;
                let parent = PublicKey::from_slice(parent_bytes)
                    .map_err(|e| KeychainError::Secp(e.to_string()))?;
                let secp = Secp256k1::new();
                let child = parent
                    .add_exp_tweak(&secp, &tweak)
                    .map_err(|_| KeychainError::InvalidChild)?;
                (KeyData::Public(child.serialize()), chain_code)
            }
        };

        Ok(Self {
            priv_version: self.priv_version,
            pub_version: self.pub_version,
            depth: self.depth.wrapping_add(1),
            parent_fp,
            child_number: index,
            chain_code,
            key,
        })
    }

    /// Produce the public extended key for this key.  Neutering a public key
    /// returns a copy.
    pub fn neuter(&self) -> KeychainResult<Self> {
        let key = KeyData::Public(self.pubkey_bytes()?);
        Ok(Self {
            priv_version: self.priv_version,
            pub_version: self.pub_version,
            depth: self.depth,
            parent_fp: self.parent_fp,
            child_number: self.child_number,
            chain_code: self.chain_code,
            key,
        })
    }

    /// The compressed serialized public key for this extended key.
    pub fn pubkey_bytes(&self) -> KeychainResult<[u8; 33]> {
        match &self.key {
            KeyData::Public(bytes) => Ok(*bytes),
            KeyData::Private(bytes) => {
                let secp = Secp256k1::new();
                let sk = SecretKey::from_slice(bytes)
                    .map_err(|e| KeychainError::Secp(e.to_string()))?;
                Ok(PublicKey::from_secret_key(&secp, &sk).serialize())
            }
        }
    }

    /// The public key as a secp256k1 point.
    pub fn ec_pubkey(&self) -> KeychainResult<PublicKey> {
        PublicKey::from_slice(&self.pubkey_bytes()?)
            .map_err(|e| KeychainError::Secp(e.to_string()))
    }

    /// A copy of the private key scalar.  The caller is responsible for
    /// erasing the copy when finished with it.
    pub fn ec_privkey(&self) -> KeychainResult<SecretKey> {
        match &self.key {
            KeyData::Private(bytes) => {
                SecretKey::from_slice(bytes).map_err(|e| KeychainError::Secp(e.to_string()))
            }
            KeyData::Public(_) => Err(KeychainError::NotPrivate),
        }
    }

    /// The pay-to-pubkey-hash address for this key.
    pub fn address(&self, params: &NetParams) -> KeychainResult<Address> {
        Ok(Address::p2pkh(hash160(&self.pubkey_bytes()?), params))
    }

    /// First four bytes of the hash160 of the public key.
    pub fn fingerprint(&self) -> KeychainResult<[u8; 4]> {
        let hash = hash160(&self.pubkey_bytes()?);
        let mut fp = [0u8; 4];
        fp.copy_from_slice(&hash[..4]);
        Ok(fp)
    }

    /// Whether this key was built for the given network.
    pub fn is_for_net(&self, params: &NetParams) -> bool {
        self.priv_version == params.hd_priv_version
            && self.pub_version == params.hd_pub_version
    }

    /// Serialize to the base58check extended-key string form.
    pub fn serialize(&self) -> String {
        let mut payload = Vec::with_capacity(SERIALIZED_KEY_SIZE);
        match &self.key {
            KeyData::Private(_) => payload.extend_from_slice(&self.priv_version),
            KeyData::Public(_) => payload.extend_from_slice(&self.pub_version),
        }
        payload.push(self.depth);
        payload.extend_from_slice(&self.parent_fp);
        payload.extend_from_slice(&self.child_number.to_be_bytes());
        payload.extend_from_slice(&self.chain_code);
        match &self.key {
            KeyData::Private(bytes) => {
                payload.push(0);
                payload.extend_from_slice(bytes);
            }
            KeyData::Public(bytes) => payload.extend_from_slice(bytes),
        }
        let encoded = base58::check_encode(&payload);
        payload.zeroize();
        encoded
    }

    /// Parse a base58check extended-key string, validating the network tag.
    pub fn parse(s: &str, params: &NetParams) -> KeychainResult<Self> {
        let mut payload = base58::check_decode(s)?;
        if payload.len() != SERIALIZED_KEY_SIZE {
            payload.zeroize();
            return Err(KeychainError::Decode(format!(
                "serialized extended key must be {} bytes, got {}",
                SERIALIZED_KEY_SIZE,
                payload.len()
            )));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&payload[..4]);
        let depth = payload[4];
        let mut parent_fp = [0u8; 4];
        parent_fp.copy_from_slice(&payload[5..9]);
        let mut child_buf = [0u8; 4];
        child_buf.copy_from_slice(&payload[9..13]);
        let child_number = u32::from_be_bytes(child_buf);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);

        let key = if version == params.hd_priv_version {
            if payload[45] != 0 {
                payload.zeroize();
                return Err(KeychainError::Decode(
                    "private key data must start with a zero byte".into(),
                ));
            }
            let mut key_bytes = [0u8; 32];
            key_bytes.copy_from_slice(&payload[46..78]);
            if SecretKey::from_slice(&key_bytes).is_err() {
                key_bytes.zeroize();
                payload.zeroize();
                return Err(KeychainError::Decode("invalid private key scalar".into()));
            }
            KeyData::Private(key_bytes)
        } else if version == params.hd_pub_version {
            let mut key_bytes = [0u8; 33];
            key_bytes.copy_from_slice(&payload[45..78]);
            if PublicKey::from_slice(&key_bytes).is_err() {
                payload.zeroize();
                return Err(KeychainError::Decode("invalid public key point".into()));
            }
            KeyData::Public(key_bytes)
        } else {
            payload.zeroize();
            return Err(KeychainError::WrongNet(format!(
                "extended key is not for {}",
                params.name
            )));
        };
        payload.zeroize();

        Ok(Self {
            priv_version: params.hd_priv_version,
            pub_version: params.hd_pub_version,
            depth,
            parent_fp,
            child_number,
            chain_code,
            key,
        })
    }

    /// Zero the key material and chain code in place.
    pub fn zero(&mut self) {
        match &mut self.key {
            KeyData::Private(bytes) => bytes.zeroize(),
            KeyData::Public(bytes) => bytes.zeroize(),
        }
        self.chain_code.zeroize();
    }
}

impl Drop for ExtendedKey {
    fn drop(&mut self) {
        if let KeyData::Private(bytes) = &mut self.key {
            bytes.zeroize();
        }
        self.chain_code.zeroize();
    }
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> KeychainResult<[u8; 64]> {
    let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(|_| KeychainError::Hmac)?;
    mac.update(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
