//! Random data-encryption keys.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::{CryptoError, CryptoResult};

/// Length in bytes of a data-encryption key.
pub const KEY_SIZE: usize = 32;

/// Length in bytes of the AES-GCM nonce prepended to every ciphertext.
pub const NONCE_SIZE: usize = 12;

/// A 32-byte symmetric data-encryption key.
///
/// Every ciphertext carries its own random nonce and an authentication tag,
/// so decryption fails with [`CryptoError::Crypto`] on a wrong key or a
/// tampered ciphertext.
pub struct CryptoKey {
    key: [u8; KEY_SIZE],
}

impl CryptoKey {
    /// Generate a fresh random key.
    pub fn generate() -> CryptoResult<Self> {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Ok(Self { key })
    }

    /// Create an all-zero key, to be filled by [`CryptoKey::copy_from`].
    ///
    /// A zeroed key is not usable for encryption of real data; it exists so a
    /// key slot can be allocated before the actual bytes are unwrapped.
    pub fn zeroed() -> Self {
        Self {
            key: [0u8; KEY_SIZE],
        }
    }

    /// Return a copy of the raw key bytes.
    pub fn bytes(&self) -> [u8; KEY_SIZE] {
        self.key
    }

    /// Overwrite this key with the given bytes.
    pub fn copy_from(&mut self, from: &[u8]) -> CryptoResult<()> {
        if from.len() != KEY_SIZE {
            return Err(CryptoError::Params(format!(
                "crypto key must be {} bytes, got {}",
                KEY_SIZE,
                from.len()
            )));
        }
        self.key.copy_from_slice(from);
        Ok(())
    }

    /// Encrypt and authenticate `plaintext`, prepending a random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = self.cipher()?;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Crypto("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Verify and decrypt a ciphertext produced by [`CryptoKey::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::Crypto("ciphertext is too short".into()));
        }
        let cipher = self.cipher()?;
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| CryptoError::Crypto("message authentication failed".into()))
    }

    /// Zero the key material in place.
    pub fn zero(&mut self) {
        self.key.zeroize();
    }

    fn cipher(&self) -> CryptoResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::Crypto(format!("failed to create cipher: {e}")))
    }
}

impl Drop for CryptoKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = CryptoKey::generate().unwrap();
        let plaintext = b"some key material";

        let ciphertext = key.encrypt(plaintext).unwrap();
        assert_ne!(&ciphertext[NONCE_SIZE..], plaintext.as_slice());

        let decrypted = key.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_nonces_are_unique() {
        let key = CryptoKey::generate().unwrap();
        let a = key.encrypt(b"data").unwrap();
        let b = key.encrypt(b"data").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = CryptoKey::generate().unwrap();
        let mut ciphertext = key.encrypt(b"data").unwrap();

        for i in 0..ciphertext.len() {
            ciphertext[i] ^= 0x01;
            assert!(key.decrypt(&ciphertext).is_err(), "bit flip at byte {i} accepted");
            ciphertext[i] ^= 0x01;
        }
        assert!(key.decrypt(&ciphertext).is_ok());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = CryptoKey::generate().unwrap();
        let other = CryptoKey::generate().unwrap();
        let ciphertext = key.encrypt(b"data").unwrap();
        assert!(other.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_copy_from_and_zero() {
        let src = CryptoKey::generate().unwrap();
        let mut dst = CryptoKey::zeroed();
        dst.copy_from(&src.bytes()).unwrap();
        assert_eq!(src.bytes(), dst.bytes());

        dst.zero();
        assert_eq!(dst.bytes(), [0u8; KEY_SIZE]);

        assert!(dst.copy_from(&[0u8; 16]).is_err());
    }
}
