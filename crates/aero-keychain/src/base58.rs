//! Base58check helpers shared by the extended-key, address, and WIF codecs.

use bitcoin_hashes::{sha256d, Hash};

use crate::{KeychainError, KeychainResult};

const CHECKSUM_SIZE: usize = 4;

/// Append a 4-byte double-SHA256 checksum and base58-encode.
pub(crate) fn check_encode(payload: &[u8]) -> String {
    let checksum = sha256d::Hash::hash(payload);
    let mut data = Vec::with_capacity(payload.len() + CHECKSUM_SIZE);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum[..CHECKSUM_SIZE]);
    bs58::encode(data).into_string()
}

/// Base58-decode and verify the trailing checksum, returning the payload.
pub(crate) fn check_decode(s: &str) -> KeychainResult<Vec<u8>> {
    let data = bs58::decode(s)
        .into_vec()
        .map_err(|e| KeychainError::Decode(format!("invalid base58: {e}")))?;
    if data.len() < CHECKSUM_SIZE {
        return Err(KeychainError::Decode("string is too short".into()));
    }
    let (payload, checksum) = data.split_at(data.len() - CHECKSUM_SIZE);
    let expected = sha256d::Hash::hash(payload);
    if checksum != &expected[..CHECKSUM_SIZE] {
        return Err(KeychainError::Decode("checksum mismatch".into()));
    }
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let payload = b"payload bytes";
        let encoded = check_encode(payload);
        assert_eq!(check_decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_corrupted_checksum() {
        let encoded = check_encode(b"payload");
        let mut chars: Vec<char> = encoded.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '1' { '2' } else { '1' };
        let corrupted: String = chars.into_iter().collect();
        assert!(check_decode(&corrupted).is_err());
    }
}
