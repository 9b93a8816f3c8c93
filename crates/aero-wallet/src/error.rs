//! Address manager error types.

use aero_crypto::CryptoError;
use aero_keychain::KeychainError;
use aero_store::StoreError;
use thiserror::Error;

/// Address manager errors, one variant per failure condition.
#[derive(Error, Debug)]
pub enum WalletError {
    /// The address manager already exists in the store.
    #[error("the address manager already exists")]
    AlreadyExists,

    /// The coin type exceeds the hardened child range.
    #[error("coin type may not exceed 2147483647")]
    CoinTypeTooHigh,

    /// The account number exceeds the allowed range.
    #[error("account number may not exceed 2147483646")]
    AccountNumTooHigh,

    /// The operation requires the manager to be unlocked.
    #[error("address manager is locked")]
    Locked,

    /// The operation is unavailable on a watching-only manager.
    #[error("address manager is watching-only")]
    WatchingOnly,

    /// A passphrase failed verification.
    #[error("{0}")]
    WrongPassphrase(String),

    /// The private passphrase may not be empty.
    #[error("private passphrase may not be empty")]
    EmptyPassphrase,

    /// Keys or addresses belong to a different network.
    #[error("{0}")]
    WrongNet(String),

    /// The address already exists in the manager.
    #[error("{0}")]
    DuplicateAddress(String),

    /// An account with the same name already exists.
    #[error("{0}")]
    DuplicateAccount(String),

    /// The account number or name is invalid for the operation.
    #[error("{0}")]
    InvalidAccount(String),

    /// An unknown crypto key kind was requested.
    #[error("invalid crypto key type")]
    InvalidKeyType,

    /// Hierarchical deterministic key derivation failed.
    #[error("{desc}")]
    KeyChain {
        /// Human description of the failed step.
        desc: String,
        /// Underlying keychain failure, when one exists.
        #[source]
        source: Option<KeychainError>,
    },

    /// An encryption or decryption operation failed.
    #[error("{desc}")]
    Crypto {
        /// Human description of the failed step.
        desc: String,
        /// Underlying crypto failure, when one exists.
        #[source]
        source: Option<CryptoError>,
    },

    /// The underlying store failed.
    #[error("{desc}")]
    Database {
        /// Human description of the failed step.
        desc: String,
        /// Underlying store failure.
        #[source]
        source: Option<StoreError>,
    },

    /// Persisted data is malformed.
    #[error("{0}")]
    Data(String),

    /// Syncing to the requested index would exceed the per-account address
    /// limit.
    #[error("{0}")]
    TooManyAddresses(String),

    /// The branch is neither external nor internal.
    #[error("unsupported account branch")]
    Branch,

    /// The requested row does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The input is not valid for the requested operation.
    #[error("{0}")]
    Input(String),

    /// The stored data requires behavior this manager does not implement.
    #[error("{0}")]
    Unimplemented(String),
}

impl WalletError {
    pub(crate) fn keychain(desc: impl Into<String>, source: KeychainError) -> Self {
        WalletError::KeyChain {
            desc: desc.into(),
            source: Some(source),
        }
    }

    pub(crate) fn crypto(desc: impl Into<String>, source: CryptoError) -> Self {
        WalletError::Crypto {
            desc: desc.into(),
            source: Some(source),
        }
    }

    pub(crate) fn closed() -> Self {
        WalletError::Input("address manager is closed".into())
    }
}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        WalletError::Database {
            desc: "store operation failed".into(),
            source: Some(err),
        }
    }
}

/// Result type for address manager operations.
pub type WalletResult<T> = Result<T, WalletError>;
