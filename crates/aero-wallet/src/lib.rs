//! # aero-wallet
//!
//! The address manager at the core of the Aero hierarchical-deterministic
//! wallet.
//!
//! This crate provides:
//! - BIP0044 account hierarchies (`m/44'/coin_type'/account'/branch/index`)
//!   with dense, monotonic account numbering and a reserved account for
//!   imported keys and scripts
//! - two-tier encryption at rest: passphrase-derived master keys wrap three
//!   data-encryption keys (public, private, script), which in turn wrap all
//!   persisted key material
//! - the live lock/unlock lifecycle with best-effort zeroization of secrets
//!   on lock, plus an irreversible conversion to watching-only mode
//! - per-account branch bookkeeping (last used and last returned child
//!   indexes) so callers can pull deterministic fresh addresses
//! - imported WIF private keys and pay-to-script-hash redeem scripts
//!
//! All state lives in an [`aero_store::Store`]; reads run inside
//! [`aero_store::Store::view`] and mutations inside
//! [`aero_store::Store::update`], so every manager operation is atomic with
//! respect to the database.

mod address;
mod error;
mod manager;
mod schema;

pub use address::ManagedAddress;
pub use error::{WalletError, WalletResult};
pub use manager::{
    AccountProperties, CryptoFactories, CryptoKeyKind, Manager, PrivKeyGuard, ScriptGuard,
};

// The scrypt options type is part of the create/change-passphrase API.
pub use aero_crypto::ScryptOptions;

use aero_keychain::HARDENED_KEY_START;
use aero_store::Store;

/// Maximum allowed account number.  Accounts are hardened children, and the
/// top of the hardened range is reserved for imported addresses.
pub const MAX_ACCOUNT_NUM: u32 = HARDENED_KEY_START - 2; // 2^31 - 2

/// Maximum allowed number of addresses per account, limited by the
/// non-hardened child range of extended keys.
pub const MAX_ADDRESSES_PER_ACCOUNT: u32 = HARDENED_KEY_START - 1;

/// Account number reserved for imported addresses.  Imported keys are not
/// derived from the wallet seed and do not fit the BIP0044 hierarchy.
pub const IMPORTED_ADDR_ACCOUNT: u32 = MAX_ACCOUNT_NUM + 1; // 2^31 - 1

/// Name of the imported account.  Reserved: no other account may take it and
/// the imported account cannot be renamed.
pub const IMPORTED_ADDR_ACCOUNT_NAME: &str = "imported";

/// Number of the default account.
pub const DEFAULT_ACCOUNT_NUM: u32 = 0;

/// Initial name of the default account.  The default account may be renamed,
/// so the number, not this name, identifies it.
const DEFAULT_ACCOUNT_NAME: &str = "default";

/// Maximum allowed BIP0044 coin type.
pub const MAX_COIN_TYPE: u32 = HARDENED_KEY_START - 1;

/// Child number of the external branch.
pub const EXTERNAL_BRANCH: u32 = 0;

/// Child number of the internal (change) branch.
pub const INTERNAL_BRANCH: u32 = 1;

/// Sentinel index meaning no address has been used or returned on a branch.
pub const NO_ADDRESS_INDEX: u32 = u32::MAX;

/// Current schema version.
pub const DB_VERSION: u32 = 1;

/// Returns true if the account name is reserved.  Reserved names may never
/// be assigned, and the accounts carrying them may not be renamed.
fn is_reserved_account_name(name: &str) -> bool {
    name == IMPORTED_ADDR_ACCOUNT_NAME
}

/// Returns true if the account number is reserved and may not be renamed.
fn is_reserved_account_num(account: u32) -> bool {
    account == IMPORTED_ADDR_ACCOUNT
}

/// Whether an address manager has already been created in the store.
pub fn exists_manager(store: &Store) -> WalletResult<bool> {
    store.view(|tx| schema::manager_exists(tx))
}

/// Validate an account name.  Empty and reserved names are rejected with
/// [`WalletError::InvalidAccount`].
pub fn validate_account_name(name: &str) -> WalletResult<()> {
    if name.is_empty() {
        return Err(WalletError::InvalidAccount(
            "accounts may not be named the empty string".into(),
        ));
    }
    if is_reserved_account_name(name) {
        return Err(WalletError::InvalidAccount(format!(
            "account name '{name}' is reserved"
        )));
    }
    Ok(())
}
