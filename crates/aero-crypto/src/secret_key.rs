//! Passphrase-derived master keys.

use rand::rngs::OsRng;
use rand::RngCore;
use scrypt::{scrypt, Params};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::{CryptoError, CryptoKey, CryptoResult, KEY_SIZE};

/// Length in bytes of the random salt mixed into the KDF.
pub const SALT_SIZE: usize = 32;

/// Length in bytes of the passphrase-verifier digest.
const DIGEST_SIZE: usize = 32;

/// Length in bytes of a marshalled parameter block: salt, digest, and the
/// three scrypt cost parameters.
pub const MARSHALLED_PARAMS_SIZE: usize = SALT_SIZE + DIGEST_SIZE + 8 + 4 + 4;

/// Scrypt cost parameters used when deriving new passphrase keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptOptions {
    /// CPU/memory cost. Must be a power of two greater than one.
    pub n: u64,
    /// Block size.
    pub r: u32,
    /// Parallelism.
    pub p: u32,
}

impl Default for ScryptOptions {
    fn default() -> Self {
        Self {
            n: 262_144, // 2^18
            r: 8,
            p: 1,
        }
    }
}

impl ScryptOptions {
    /// Cheap parameters for tests.  Far too weak for real wallets.
    pub fn for_testing() -> Self {
        Self { n: 16, r: 8, p: 1 }
    }

    fn params(&self) -> CryptoResult<Params> {
        if !self.n.is_power_of_two() || self.n < 2 {
            return Err(CryptoError::Params(format!(
                "scrypt N must be a power of two greater than one, got {}",
                self.n
            )));
        }
        let log_n = self.n.trailing_zeros() as u8;
        Params::new(log_n, self.r, self.p, KEY_SIZE)
            .map_err(|e| CryptoError::Params(format!("invalid scrypt parameters: {e}")))
    }
}

/// The persisted portion of a [`SecretKey`]: salt, verifier digest, and cost
/// parameters.  Contains no secret material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretKeyParams {
    salt: [u8; SALT_SIZE],
    digest: [u8; DIGEST_SIZE],
    options: ScryptOptions,
}

/// A master key derived from a passphrase with scrypt.
///
/// The derived 32 bytes act as a [`CryptoKey`]; a SHA-256 digest of them is
/// kept alongside the salt and cost parameters as a passphrase verifier, so
/// [`SecretKey::derive`] can reject a wrong passphrase without attempting a
/// decryption.
pub struct SecretKey {
    key: CryptoKey,
    params: SecretKeyParams,
}

impl SecretKey {
    /// Derive a new master key from `passphrase` with a fresh random salt.
    pub fn new(passphrase: &[u8], options: &ScryptOptions) -> CryptoResult<Self> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let raw = Zeroizing::new(derive_raw(passphrase, &salt, options)?);
        let digest: [u8; DIGEST_SIZE] = Sha256::digest(raw.as_slice()).into();

        let mut key = CryptoKey::zeroed();
        key.copy_from(raw.as_slice())?;

        Ok(Self {
            key,
            params: SecretKeyParams {
                salt,
                digest,
                options: *options,
            },
        })
    }

    /// Reconstruct a key from persisted parameters.  The key material itself
    /// is zero until [`SecretKey::derive`] succeeds.
    pub fn from_parameters(params: SecretKeyParams) -> Self {
        Self {
            key: CryptoKey::zeroed(),
            params,
        }
    }

    /// Serialize the non-secret parameters for persistence.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MARSHALLED_PARAMS_SIZE);
        out.extend_from_slice(&self.params.salt);
        out.extend_from_slice(&self.params.digest);
        out.extend_from_slice(&self.params.options.n.to_le_bytes());
        out.extend_from_slice(&self.params.options.r.to_le_bytes());
        out.extend_from_slice(&self.params.options.p.to_le_bytes());
        out
    }

    /// Parse a parameter block produced by [`SecretKey::marshal`].  The
    /// returned key is unusable until [`SecretKey::derive`] succeeds.
    pub fn unmarshal(data: &[u8]) -> CryptoResult<Self> {
        if data.len() != MARSHALLED_PARAMS_SIZE {
            return Err(CryptoError::Params(format!(
                "marshalled secret key must be {} bytes, got {}",
                MARSHALLED_PARAMS_SIZE,
                data.len()
            )));
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&data[..SALT_SIZE]);
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&data[SALT_SIZE..SALT_SIZE + DIGEST_SIZE]);

        let rest = &data[SALT_SIZE + DIGEST_SIZE..];
        let mut n_buf = [0u8; 8];
        n_buf.copy_from_slice(&rest[..8]);
        let n = u64::from_le_bytes(n_buf);
        let mut r_buf = [0u8; 4];
        r_buf.copy_from_slice(&rest[8..12]);
        let r = u32::from_le_bytes(r_buf);
        let mut p_buf = [0u8; 4];
        p_buf.copy_from_slice(&rest[12..16]);
        let p = u32::from_le_bytes(p_buf);

        Ok(Self::from_parameters(SecretKeyParams {
            salt,
            digest,
            options: ScryptOptions { n, r, p },
        }))
    }

    /// Re-derive the key material from `passphrase` using the stored salt and
    /// cost parameters.  Fails with [`CryptoError::WrongPassphrase`] when the
    /// derived key does not match the stored verifier digest.
    pub fn derive(&mut self, passphrase: &[u8]) -> CryptoResult<()> {
        let raw = Zeroizing::new(derive_raw(passphrase, &self.params.salt, &self.params.options)?);
        let digest: [u8; DIGEST_SIZE] = Sha256::digest(raw.as_slice()).into();
        if digest != self.params.digest {
            return Err(CryptoError::WrongPassphrase);
        }
        self.key.copy_from(raw.as_slice())
    }

    /// The persisted parameters of this key.
    pub fn parameters(&self) -> SecretKeyParams {
        self.params
    }

    /// Encrypt and authenticate `plaintext` under the derived key.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.key.encrypt(plaintext)
    }

    /// Verify and decrypt a ciphertext produced by [`SecretKey::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        self.key.decrypt(data)
    }

    /// Zero the derived key material.  The parameters are retained so the key
    /// can be re-derived later.
    pub fn zero(&mut self) {
        self.key.zero();
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        // CryptoKey zeroizes itself; the salt is not secret but clearing it
        // costs nothing.
        self.params.salt.zeroize();
    }
}

fn derive_raw(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
    options: &ScryptOptions,
) -> CryptoResult<[u8; KEY_SIZE]> {
    let params = options.params()?;
    let mut out = [0u8; KEY_SIZE];
    scrypt(passphrase, salt, &params, &mut out)
        .map_err(|e| CryptoError::Crypto(format!("scrypt failed: {e}")))?;
    Ok(out)
}
