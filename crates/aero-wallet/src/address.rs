//! Managed address values materialised from persisted rows.

use aero_keychain::{Address, HASH160_SIZE};
use secp256k1::PublicKey;

use crate::{IMPORTED_ADDR_ACCOUNT, INTERNAL_BRANCH};

/// A live address served by the manager, carrying the bookkeeping needed to
/// locate its key material.
///
/// Unknown persisted variants never reach this type; the row decoder rejects
/// them as malformed data.
#[derive(Debug, Clone)]
pub enum ManagedAddress {
    /// An address derived from an account's extended public key at
    /// `m/44'/coin_type'/account'/branch/index`.
    Chained {
        /// The pay-to-pubkey-hash address.
        address: Address,
        /// Owning BIP0044 account.
        account: u32,
        /// External (0) or internal (1) branch.
        branch: u32,
        /// Child index on the branch.
        index: u32,
        /// The derived public key.
        pubkey: PublicKey,
    },
    /// An imported private/public key pair.
    ImportedKey {
        /// The pay-to-pubkey-hash address.
        address: Address,
        /// Always the imported account.
        account: u32,
        /// The imported public key.
        pubkey: PublicKey,
        /// Whether the public key serializes compressed.
        compressed: bool,
    },
    /// An imported pay-to-script-hash script.
    ImportedScript {
        /// The pay-to-script-hash address.
        address: Address,
        /// Always the imported account.
        account: u32,
    },
}

impl ManagedAddress {
    /// The account this address belongs to.
    pub fn account(&self) -> u32 {
        match self {
            ManagedAddress::Chained { account, .. }
            | ManagedAddress::ImportedKey { account, .. }
            | ManagedAddress::ImportedScript { account, .. } => *account,
        }
    }

    /// The underlying address.
    pub fn address(&self) -> &Address {
        match self {
            ManagedAddress::Chained { address, .. }
            | ManagedAddress::ImportedKey { address, .. }
            | ManagedAddress::ImportedScript { address, .. } => address,
        }
    }

    /// The 20-byte hash identifying this address.
    pub fn hash160(&self) -> [u8; HASH160_SIZE] {
        self.address().hash160()
    }

    /// Whether this address sits on an account's internal (change) branch.
    pub fn internal(&self) -> bool {
        matches!(
            self,
            ManagedAddress::Chained {
                branch: INTERNAL_BRANCH,
                ..
            }
        )
    }

    /// Whether this address was imported rather than derived.
    pub fn imported(&self) -> bool {
        self.account() == IMPORTED_ADDR_ACCOUNT
    }

    /// The public key behind this address, when one exists.
    pub fn pubkey(&self) -> Option<&PublicKey> {
        match self {
            ManagedAddress::Chained { pubkey, .. }
            | ManagedAddress::ImportedKey { pubkey, .. } => Some(pubkey),
            ManagedAddress::ImportedScript { .. } => None,
        }
    }
}
