//! The address manager state core.
//!
//! A [`Manager`] owns every in-memory secret: the passphrase-derived master
//! keys, the unwrapped crypto keys, cached account extended keys, and the
//! registry of secrets that have been handed out to callers.  Two locks
//! guard that state:
//!
//! - `state` protects all fields, including the lock/watching-only/closed
//!   flags.  Mutating operations take it for writing, queries for reading.
//! - `returned_secrets` protects the handed-out private keys and scripts.
//!   Every [`PrivKeyGuard`] and [`ScriptGuard`] holds it for reading, so
//!   [`Manager::lock`] blocks until all callers release their secrets before
//!   zeroing them.  The write lock takes priority over new readers, so a
//!   stream of `private_key` calls cannot starve a pending lock.

use std::collections::HashMap;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{PublicKey, SecretKey as PrivateKey};
use sha2::{Digest, Sha512};
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use aero_crypto::{CryptoError, CryptoKey, CryptoResult, ScryptOptions, SecretKey};
use aero_keychain::{
    Address, ExtendedKey, KeychainError, NetParams, Wif, HARDENED_KEY_START, HASH160_SIZE,
};
use aero_store::{ReadView, Store, WriteTxn};

use crate::schema::{self, AccountRow, AddressRow};
use crate::{
    is_reserved_account_num, validate_account_name, ManagedAddress, WalletError, WalletResult,
    DB_VERSION, DEFAULT_ACCOUNT_NAME, DEFAULT_ACCOUNT_NUM, EXTERNAL_BRANCH,
    IMPORTED_ADDR_ACCOUNT, IMPORTED_ADDR_ACCOUNT_NAME, INTERNAL_BRANCH, MAX_ACCOUNT_NUM,
    MAX_ADDRESSES_PER_ACCOUNT, MAX_COIN_TYPE, NO_ADDRESS_INDEX,
};

/// Number of bytes of the salt used when hashing private passphrases.
const SALT_SIZE: usize = 32;

/// Selects which data-encryption key an [`Manager::encrypt`] or
/// [`Manager::decrypt`] call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoKeyKind {
    /// The key protecting public data such as extended public keys.
    Public,
    /// The key protecting private key material.  Requires the manager to be
    /// unlocked.
    Private,
    /// The key protecting scripts.  Requires the manager to be unlocked.
    Script,
}

/// Factory for passphrase-derived master keys.
pub type SecretKeyFactory = fn(&[u8], &ScryptOptions) -> CryptoResult<SecretKey>;

/// Factory for random data-encryption keys.
pub type CryptoKeyFactory = fn() -> CryptoResult<CryptoKey>;

/// Key-generation functions used when creating a manager and changing
/// passphrases.  Tests substitute failing versions to exercise error paths.
#[derive(Clone, Copy)]
pub struct CryptoFactories {
    /// Produces a new passphrase-derived master key.
    pub secret_key: SecretKeyFactory,
    /// Produces a new random data-encryption key.
    pub crypto_key: CryptoKeyFactory,
}

fn default_secret_key(passphrase: &[u8], options: &ScryptOptions) -> CryptoResult<SecretKey> {
    SecretKey::new(passphrase, options)
}

fn default_crypto_key() -> CryptoResult<CryptoKey> {
    CryptoKey::generate()
}

impl Default for CryptoFactories {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key,
            crypto_key: default_crypto_key,
        }
    }
}

/// Properties associated with an account.  When no address usage has been
/// recorded on a branch, the index is [`crate::NO_ADDRESS_INDEX`].
#[derive(Debug, Clone)]
pub struct AccountProperties {
    /// The account number.
    pub account_number: u32,
    /// The current account name.
    pub account_name: String,
    /// Highest used child index on the external branch.
    pub last_used_external_index: u32,
    /// Highest used child index on the internal branch.
    pub last_used_internal_index: u32,
    /// Highest child index returned to a caller on the external branch.
    pub last_returned_external_index: u32,
    /// Highest child index returned to a caller on the internal branch.
    pub last_returned_internal_index: u32,
    /// Number of imported keys and scripts; nonzero only for the imported
    /// account.
    pub imported_key_count: u32,
}

/// Cached per-account state: the extended keys needed to derive addresses.
/// The private key is present only while the manager is unlocked.
struct AccountInfo {
    name: String,
    acct_key_encrypted: Vec<u8>,
    acct_key_priv: Option<ExtendedKey>,
    acct_key_pub: ExtendedKey,
}

/// Secrets that have been handed out to callers, kept so they can be zeroed
/// when the manager locks.
#[derive(Default)]
struct ReturnedSecrets {
    priv_keys: HashMap<[u8; HASH160_SIZE], PrivateKey>,
    scripts: HashMap<[u8; HASH160_SIZE], Vec<u8>>,
}

impl ReturnedSecrets {
    fn zero_and_clear(&mut self) {
        for key in self.priv_keys.values_mut() {
            key.non_secure_erase();
        }
        for script in self.scripts.values_mut() {
            script.zeroize();
        }
        self.priv_keys.clear();
        self.scripts.clear();
    }
}

/// A private key handed out by [`Manager::private_key`].
///
/// Holds the returned-secrets read lock; dropping the guard releases it.
/// [`Manager::lock`] waits for every outstanding guard before zeroing, so
/// guards must not be kept across a lock attempt on the same thread.
pub struct PrivKeyGuard<'m> {
    secrets: RwLockReadGuard<'m, ReturnedSecrets>,
    hash: [u8; HASH160_SIZE],
}

impl std::fmt::Debug for PrivKeyGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivKeyGuard").finish_non_exhaustive()
    }
}

impl PrivKeyGuard<'_> {
    /// The returned private key, valid until this guard is dropped.
    pub fn key(&self) -> &PrivateKey {
        // The entry cannot be removed while the read lock is held.
        &self.secrets.priv_keys[&self.hash]
    }
}

/// A redeem script handed out by [`Manager::redeem_script`].  Dereferences to
/// the script bytes; the same release rules as [`PrivKeyGuard`] apply.
pub struct ScriptGuard<'m> {
    secrets: RwLockReadGuard<'m, ReturnedSecrets>,
    hash: [u8; HASH160_SIZE],
}

impl std::fmt::Debug for ScriptGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptGuard").finish_non_exhaustive()
    }
}

impl std::ops::Deref for ScriptGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.secrets.scripts[&self.hash]
    }
}

/// All mutable manager state, guarded by the state lock.
struct Inner {
    watching_only: bool,
    locked: bool,
    closed: bool,

    /// Cached account derivation state.
    acct_info: HashMap<u32, AccountInfo>,

    /// Master keys securing the crypto keys.  These are not BIP0032 keys.
    /// The private master key is absent after a watching-only conversion and
    /// underived while locked.
    master_key_pub: SecretKey,
    master_key_priv: Option<SecretKey>,

    /// The crypto public key stays unwrapped even while locked so public
    /// data remains readable.
    crypto_key_pub: CryptoKey,
    crypto_key_priv_encrypted: Vec<u8>,
    crypto_key_priv: CryptoKey,
    crypto_key_script_encrypted: Vec<u8>,
    crypto_key_script: CryptoKey,

    /// Salt and hash for the unlock fast path: when already unlocked, a
    /// passphrase is checked against `SHA-512(salt || passphrase)` instead
    /// of re-running the KDF.  The hash is zeroed on every lock.
    priv_passphrase_salt: [u8; SALT_SIZE],
    hashed_priv_passphrase: [u8; 64],
}

/// A concurrency-safe address manager and key store.
pub struct Manager {
    state: RwLock<Inner>,
    returned_secrets: RwLock<ReturnedSecrets>,
    chain_params: &'static NetParams,
    factories: CryptoFactories,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager").finish_non_exhaustive()
    }
}

impl Manager {
    // -- lifecycle -----------------------------------------------------------

    /// Create a new address manager in the store.
    ///
    /// The seed becomes the BIP0032 master node from which every chained
    /// address derives, so the same seed recovers all of them.  The public
    /// passphrase is required to open the manager; the private passphrase is
    /// required to unlock it.
    ///
    /// Fails with [`WalletError::AlreadyExists`] when the store already
    /// contains a manager and [`WalletError::EmptyPassphrase`] when the
    /// private passphrase is empty.
    pub fn create(
        store: &Store,
        seed: &[u8],
        pub_passphrase: &[u8],
        priv_passphrase: &[u8],
        params: &'static NetParams,
        options: &ScryptOptions,
    ) -> WalletResult<()> {
        Self::create_with_factories(
            store,
            seed,
            pub_passphrase,
            priv_passphrase,
            params,
            options,
            CryptoFactories::default(),
        )
    }

    /// [`Manager::create`] with injected key-generation functions.
    pub fn create_with_factories(
        store: &Store,
        seed: &[u8],
        pub_passphrase: &[u8],
        priv_passphrase: &[u8],
        params: &'static NetParams,
        options: &ScryptOptions,
        factories: CryptoFactories,
    ) -> WalletResult<()> {
        store.update(|tx| {
            create_address_manager(
                tx,
                seed,
                pub_passphrase,
                priv_passphrase,
                params,
                options,
                &factories,
            )
        })
    }

    /// Create a watching-only address manager from an account extended
    /// public key.  No private material is stored; the on-disk layout still
    /// carries dummy private-tier parameters derived from the public
    /// passphrase so the schema stays uniform.
    pub fn create_watch_only(
        store: &Store,
        acct_xpub: &str,
        pub_passphrase: &[u8],
        params: &'static NetParams,
        options: &ScryptOptions,
    ) -> WalletResult<()> {
        let factories = CryptoFactories::default();
        store.update(|tx| {
            create_watch_only(tx, acct_xpub, pub_passphrase, params, options, &factories)
        })
    }

    /// Open an existing address manager.  The public passphrase decrypts the
    /// public tier; the manager starts locked.
    pub fn open(
        store: &Store,
        pub_passphrase: &[u8],
        params: &'static NetParams,
    ) -> WalletResult<Manager> {
        Self::open_with_factories(store, pub_passphrase, params, CryptoFactories::default())
    }

    /// [`Manager::open`] with injected key-generation functions.
    pub fn open_with_factories(
        store: &Store,
        pub_passphrase: &[u8],
        params: &'static NetParams,
        factories: CryptoFactories,
    ) -> WalletResult<Manager> {
        store.view(|tx| load_manager(tx, pub_passphrase, params, factories))
    }

    /// Shut the manager down, zeroing all private and sensitive public key
    /// material.  Every subsequent operation fails.
    pub fn close(&self) {
        let mut inner = self.state.write();
        if inner.closed {
            return;
        }
        if !inner.watching_only && !inner.locked {
            Self::lock_inner(&mut inner, &self.returned_secrets);
        }
        for info in inner.acct_info.values_mut() {
            info.acct_key_pub.zero();
            if let Some(key) = info.acct_key_priv.as_mut() {
                key.zero();
            }
        }
        inner.acct_info.clear();
        inner.crypto_key_pub.zero();
        inner.master_key_pub.zero();
        inner.closed = true;
        info!("Address manager closed");
    }

    /// The network parameters this manager was opened with.
    pub fn chain_params(&self) -> &'static NetParams {
        self.chain_params
    }

    // -- lock state ----------------------------------------------------------

    /// Whether the manager only holds public material.
    pub fn watching_only(&self) -> bool {
        self.state.read().watching_only
    }

    /// Whether the private-tier keys are currently unavailable.
    pub fn is_locked(&self) -> bool {
        self.state.read().locked
    }

    /// Zero and drop every private-tier secret from memory.  Blocks until
    /// all handed-out private keys and scripts have been released.
    ///
    /// Fails with [`WalletError::WatchingOnly`] on a watching-only manager
    /// and [`WalletError::Locked`] when already locked.
    pub fn lock(&self) -> WalletResult<()> {
        let mut inner = self.state_write()?;
        if inner.watching_only {
            return Err(WalletError::WatchingOnly);
        }
        if inner.locked {
            return Err(WalletError::Locked);
        }
        Self::lock_inner(&mut inner, &self.returned_secrets);
        info!("Address manager locked");
        Ok(())
    }

    /// Derive the private master key from the passphrase and unwrap the
    /// private tier.  Any failure leaves the manager locked with all partial
    /// material zeroed.
    ///
    /// When the manager is already unlocked, the passphrase is verified
    /// against a salted hash without re-running the KDF.
    pub fn unlock(&self, passphrase: &[u8]) -> WalletResult<()> {
        let mut inner = self.state_write()?;
        if inner.watching_only {
            return Err(WalletError::WatchingOnly);
        }

        // Fast path: already unlocked, check the passphrase hash only.
        if !inner.locked {
            let hashed = hash_passphrase(&inner.priv_passphrase_salt, passphrase);
            if hashed != inner.hashed_priv_passphrase {
                Self::lock_inner(&mut inner, &self.returned_secrets);
                return Err(WalletError::WrongPassphrase(
                    "invalid passphrase for private master key".into(),
                ));
            }
            return Ok(());
        }

        let derived = match inner.master_key_priv.as_mut() {
            Some(master) => master.derive(passphrase),
            None => Err(CryptoError::Crypto("missing private master key".into())),
        };
        if let Err(err) = derived {
            Self::lock_inner(&mut inner, &self.returned_secrets);
            return Err(match err {
                CryptoError::WrongPassphrase => WalletError::WrongPassphrase(
                    "invalid passphrase for private master key".into(),
                ),
                err => WalletError::crypto("failed to derive private master key", err),
            });
        }

        // Unwrap the crypto private and script keys under the master key.
        let decrypted = {
            let master = match inner.master_key_priv.as_ref() {
                Some(master) => master,
                None => {
                    Self::lock_inner(&mut inner, &self.returned_secrets);
                    return Err(WalletError::Crypto {
                        desc: "missing private master key".into(),
                        source: None,
                    });
                }
            };
            master
                .decrypt(&inner.crypto_key_priv_encrypted)
                .map(Zeroizing::new)
                .map_err(|e| WalletError::crypto("failed to decrypt crypto private key", e))
                .and_then(|priv_bytes| {
                    master
                        .decrypt(&inner.crypto_key_script_encrypted)
                        .map(Zeroizing::new)
                        .map_err(|e| {
                            WalletError::crypto("failed to decrypt crypto script key", e)
                        })
                        .map(|script_bytes| (priv_bytes, script_bytes))
                })
        };
        let (priv_bytes, script_bytes) = match decrypted {
            Ok(pair) => pair,
            Err(err) => {
                Self::lock_inner(&mut inner, &self.returned_secrets);
                return Err(err);
            }
        };
        if let Err(err) = inner
            .crypto_key_priv
            .copy_from(&priv_bytes)
            .and_then(|()| inner.crypto_key_script.copy_from(&script_bytes))
        {
            Self::lock_inner(&mut inner, &self.returned_secrets);
            return Err(WalletError::crypto("failed to install crypto keys", err));
        }
        drop(priv_bytes);
        drop(script_bytes);

        // Unwrap the account private extended keys for every cached account.
        let accounts: Vec<u32> = inner.acct_info.keys().copied().collect();
        for account in accounts {
            let parsed = Self::decrypt_account_priv(&inner, account, self.chain_params);
            match parsed {
                Ok(key) => {
                    if let Some(info) = inner.acct_info.get_mut(&account) {
                        info.acct_key_priv = Some(key);
                    }
                }
                Err(err) => {
                    Self::lock_inner(&mut inner, &self.returned_secrets);
                    return Err(err);
                }
            }
        }

        inner.locked = false;
        inner.hashed_priv_passphrase =
            hash_passphrase(&inner.priv_passphrase_salt, passphrase);
        info!("Address manager unlocked");
        Ok(())
    }

    /// Change the public or private passphrase.  The old passphrase is
    /// verified on a copy of the master key so a failure leaves the live
    /// state untouched; the wrapped crypto keys are re-encrypted under the
    /// new master key and everything persists in this one transaction before
    /// the in-memory swap.
    pub fn change_passphrase(
        &self,
        tx: &WriteTxn<'_>,
        old_passphrase: &[u8],
        new_passphrase: &[u8],
        private: bool,
        options: &ScryptOptions,
    ) -> WalletResult<()> {
        let mut inner = self.state_write()?;
        if private && inner.watching_only {
            return Err(WalletError::WatchingOnly);
        }

        // Verify the old passphrase against a throwaway copy of the master
        // key parameters.
        let key_name = if private { "private" } else { "public" };
        let params = if private {
            match inner.master_key_priv.as_ref() {
                Some(master) => master.parameters(),
                None => {
                    return Err(WalletError::Crypto {
                        desc: "missing private master key".into(),
                        source: None,
                    })
                }
            }
        } else {
            inner.master_key_pub.parameters()
        };
        let mut candidate = SecretKey::from_parameters(params);
        match candidate.derive(old_passphrase) {
            Ok(()) => {}
            Err(CryptoError::WrongPassphrase) => {
                return Err(WalletError::WrongPassphrase(format!(
                    "invalid passphrase for {key_name} master key"
                )));
            }
            Err(err) => {
                return Err(WalletError::crypto(
                    format!("failed to derive {key_name} master key"),
                    err,
                ));
            }
        }

        let mut new_master = (self.factories.secret_key)(new_passphrase, options)
            .map_err(|e| WalletError::crypto("failed to create new master key", e))?;
        let new_params = new_master.marshal();

        if private {
            let mut salt = [0u8; SALT_SIZE];
            OsRng.fill_bytes(&mut salt);

            // Re-encrypt the crypto private and script keys under the new
            // master private key.
            let dec_priv = Zeroizing::new(
                candidate
                    .decrypt(&inner.crypto_key_priv_encrypted)
                    .map_err(|e| WalletError::crypto("failed to decrypt crypto private key", e))?,
            );
            let enc_priv = new_master
                .encrypt(&dec_priv)
                .map_err(|e| WalletError::crypto("failed to encrypt crypto private key", e))?;
            let dec_script = Zeroizing::new(
                candidate
                    .decrypt(&inner.crypto_key_script_encrypted)
                    .map_err(|e| WalletError::crypto("failed to decrypt crypto script key", e))?,
            );
            let enc_script = new_master
                .encrypt(&dec_script)
                .map_err(|e| WalletError::crypto("failed to encrypt crypto script key", e))?;

            // While locked there is no derived key to keep; when unlocked,
            // refresh the fast-path hash with the new salt and passphrase.
            let mut hashed = [0u8; 64];
            if inner.locked {
                new_master.zero();
            } else {
                hashed = hash_passphrase(&salt, new_passphrase);
            }

            schema::put_crypto_keys(tx, None, Some(enc_priv.as_slice()), Some(enc_script.as_slice()));
            schema::put_master_key_params(tx, None, Some(new_params.as_slice()));

            inner.crypto_key_priv_encrypted = enc_priv;
            inner.crypto_key_script_encrypted = enc_script;
            if let Some(old) = inner.master_key_priv.as_mut() {
                old.zero();
            }
            inner.master_key_priv = Some(new_master);
            inner.priv_passphrase_salt = salt;
            inner.hashed_priv_passphrase = hashed;
        } else {
            let pub_bytes = Zeroizing::new(inner.crypto_key_pub.bytes());
            let enc_pub = new_master
                .encrypt(pub_bytes.as_slice())
                .map_err(|e| WalletError::crypto("failed to encrypt crypto public key", e))?;

            schema::put_crypto_keys(tx, Some(enc_pub.as_slice()), None, None);
            schema::put_master_key_params(tx, Some(new_params.as_slice()), None);

            inner.master_key_pub.zero();
            inner.master_key_pub = new_master;
        }

        info!(key = key_name, "Passphrase changed");
        Ok(())
    }

    /// Irreversibly convert to a watching-only manager: every private-tier
    /// ciphertext is deleted from the store and every private-tier byte in
    /// memory is zeroed.  Converting an already watching-only manager has no
    /// effect.
    pub fn convert_to_watching_only(&self, tx: &WriteTxn<'_>) -> WalletResult<()> {
        let mut inner = self.state_write()?;
        if inner.watching_only {
            return Ok(());
        }

        schema::delete_private_keys(tx)?;
        schema::put_watching_only(tx, true);

        if !inner.locked {
            Self::lock_inner(&mut inner, &self.returned_secrets);
        }

        // The encrypted private-tier copies are no longer needed either.
        for info in inner.acct_info.values_mut() {
            info.acct_key_encrypted.zeroize();
            info.acct_key_encrypted = Vec::new();
        }
        self.returned_secrets.write().zero_and_clear();
        inner.crypto_key_priv_encrypted.zeroize();
        inner.crypto_key_priv_encrypted = Vec::new();
        inner.crypto_key_script_encrypted.zeroize();
        inner.crypto_key_script_encrypted = Vec::new();

        // The master private key is derived from a passphrase, so there is
        // no encrypted copy to clear.
        if let Some(master) = inner.master_key_priv.as_mut() {
            master.zero();
        }
        inner.master_key_priv = None;

        inner.watching_only = true;
        info!("Address manager converted to watching-only");
        Ok(())
    }

    // -- accounts ------------------------------------------------------------

    /// Create a new account with the given name and return its number.
    /// Account numbers are dense: each new account takes the next number.
    /// Requires the manager to be unlocked.
    pub fn new_account(&self, tx: &WriteTxn<'_>, name: &str) -> WalletResult<u32> {
        let inner = self.state_write()?;
        if inner.watching_only {
            return Err(WalletError::WatchingOnly);
        }
        if inner.locked {
            return Err(WalletError::Locked);
        }

        validate_account_name(name)?;
        if schema::fetch_account_by_name(tx, name).is_ok() {
            return Err(WalletError::DuplicateAccount(format!(
                "account named '{name}' already exists"
            )));
        }

        let account = schema::fetch_last_account(tx)? + 1;

        // Unwrap the coin-type private key just long enough to derive the
        // account keys from it.
        let coin_type_priv = self.decrypt_coin_type_priv(&inner, tx)?;
        let acct_key_priv = derive_account_key(&coin_type_priv, account)?;
        drop(coin_type_priv);
        let acct_key_pub = acct_key_priv
            .neuter()
            .map_err(|e| WalletError::keychain("failed to neuter account key", e))?;

        let serialized = Zeroizing::new(acct_key_pub.serialize());
        let acct_pub_enc = inner
            .crypto_key_pub
            .encrypt(serialized.as_bytes())
            .map_err(|e| WalletError::crypto("failed to encrypt public key for account", e))?;
        let serialized = Zeroizing::new(acct_key_priv.serialize());
        let acct_priv_enc = inner
            .crypto_key_priv
            .encrypt(serialized.as_bytes())
            .map_err(|e| WalletError::crypto("failed to encrypt private key for account", e))?;

        let row = new_account_row(acct_pub_enc, acct_priv_enc, name);
        schema::put_account_info(tx, account, &row);
        schema::put_last_account(tx, account);

        // The account cache is filled lazily on first use rather than here:
        // the transaction can still roll back after this call returns.
        info!(account, name, "Created account");
        Ok(account)
    }

    /// Rename an account.  The imported account is reserved and cannot be
    /// renamed; reserved names cannot be assigned.
    pub fn rename_account(&self, tx: &WriteTxn<'_>, account: u32, name: &str) -> WalletResult<()> {
        let mut inner = self.state_write()?;

        if is_reserved_account_num(account) {
            return Err(WalletError::InvalidAccount(
                "reserved account cannot be renamed".into(),
            ));
        }
        if schema::fetch_account_by_name(tx, name).is_ok() {
            return Err(WalletError::DuplicateAccount(format!(
                "account named '{name}' already exists"
            )));
        }
        validate_account_name(name)?;

        let mut row = schema::fetch_account_info(tx, account)?;
        schema::delete_account_id_index(tx, account);
        schema::delete_account_name_index(tx, &row.name);
        row.name = name.to_string();
        schema::put_account_info(tx, account, &row);

        if let Some(info) = inner.acct_info.get_mut(&account) {
            info.name = name.to_string();
        }

        debug!(account, name, "Renamed account");
        Ok(())
    }

    /// Look up the account number for a name.
    pub fn lookup_account(&self, tx: &impl ReadView, name: &str) -> WalletResult<u32> {
        self.check_open()?;
        schema::fetch_account_by_name(tx, name)
    }

    /// The name of an account.
    pub fn account_name(&self, tx: &impl ReadView, account: u32) -> WalletResult<String> {
        self.check_open()?;
        schema::fetch_account_name(tx, account)
    }

    /// The highest created account number.
    pub fn last_account(&self, tx: &impl ReadView) -> WalletResult<u32> {
        self.check_open()?;
        schema::fetch_last_account(tx)
    }

    /// Properties of an account: its name and branch bookkeeping indexes.
    /// For the imported account the indexes are meaningless and the imported
    /// key count is populated instead.
    pub fn account_properties(
        &self,
        tx: &impl ReadView,
        account: u32,
    ) -> WalletResult<AccountProperties> {
        let _inner = self.state_read()?;

        let row = schema::fetch_account_info(tx, account)?;
        let mut props = AccountProperties {
            account_number: account,
            account_name: row.name,
            last_used_external_index: row.last_used_external_index,
            last_used_internal_index: row.last_used_internal_index,
            last_returned_external_index: row.last_returned_external_index,
            last_returned_internal_index: row.last_returned_internal_index,
            imported_key_count: 0,
        };
        if account == IMPORTED_ADDR_ACCOUNT {
            props.account_name = IMPORTED_ADDR_ACCOUNT_NAME.to_string();
            props.imported_key_count = schema::account_address_rows(tx, account)?.len() as u32;
        }
        Ok(props)
    }

    /// Call `f` with every account number, ascending, stopping early on
    /// error.
    pub fn for_each_account(
        &self,
        tx: &impl ReadView,
        mut f: impl FnMut(u32) -> WalletResult<()>,
    ) -> WalletResult<()> {
        self.check_open()?;
        for account in schema::accounts(tx)? {
            f(account)?;
        }
        Ok(())
    }

    /// The extended public key of an account, from which its branch keys
    /// derive.
    pub fn account_xpub(&self, tx: &impl ReadView, account: u32) -> WalletResult<ExtendedKey> {
        if account == IMPORTED_ADDR_ACCOUNT {
            return Err(WalletError::InvalidAccount(
                "the imported account does not contain an extended key".into(),
            ));
        }
        let mut inner = self.state_write()?;
        let info = self.load_account_info(&mut inner, tx, account)?;
        Ok(info.acct_key_pub.clone())
    }

    /// The extended public key of an account branch, from which the branch's
    /// addresses derive.
    pub fn account_branch_xpub(
        &self,
        tx: &impl ReadView,
        account: u32,
        branch: u32,
    ) -> WalletResult<ExtendedKey> {
        if branch != EXTERNAL_BRANCH && branch != INTERNAL_BRANCH {
            return Err(WalletError::Branch);
        }
        let acct_xpub = self.account_xpub(tx, account)?;
        acct_xpub
            .child(branch)
            .map_err(|e| WalletError::keychain("failed to derive branch xpub", e))
    }

    /// The coin-type private key at `m/44'/coin_type'`.  The caller must
    /// zero the key and everything derived from it when finished.  Requires
    /// the manager to be unlocked.
    pub fn coin_type_privkey(&self, tx: &impl ReadView) -> WalletResult<ExtendedKey> {
        let inner = self.state_read()?;
        if inner.watching_only {
            return Err(WalletError::WatchingOnly);
        }
        if inner.locked {
            return Err(WalletError::Locked);
        }
        self.decrypt_coin_type_priv(&inner, tx)
    }

    /// The encoded extended public key of an account, decrypted from its
    /// row.
    pub fn master_pubkey(&self, tx: &impl ReadView, account: u32) -> WalletResult<String> {
        let inner = self.state_read()?;
        let row = schema::fetch_account_info(tx, account)?;
        let serialized = inner.crypto_key_pub.decrypt(&row.pub_key_enc).map_err(|e| {
            WalletError::crypto(
                format!("failed to decrypt public key for account {account}"),
                e,
            )
        })?;
        String::from_utf8(serialized)
            .map_err(|_| WalletError::Data("account public key is not valid utf-8".into()))
    }

    // -- address bookkeeping -------------------------------------------------

    /// Ensure a chained address row exists for every child of the branch up
    /// to `sync_to_index`.
    ///
    /// Children are generated in reverse, down towards zero, stopping at the
    /// first child that is already saved: every earlier child is then known
    /// to exist as well, so a restart only pays for the new addresses.
    pub fn sync_account_to_addr_index(
        &self,
        tx: &WriteTxn<'_>,
        account: u32,
        branch: u32,
        sync_to_index: u32,
    ) -> WalletResult<()> {
        if account > MAX_ACCOUNT_NUM {
            return Err(WalletError::AccountNumTooHigh);
        }
        let mut inner = self.state_write()?;
        if account == IMPORTED_ADDR_ACCOUNT {
            return Err(WalletError::InvalidAccount(
                "cannot sync account branch indexes for imported account".into(),
            ));
        }
        if branch != EXTERNAL_BRANCH && branch != INTERNAL_BRANCH {
            return Err(WalletError::Branch);
        }
        if sync_to_index > MAX_ADDRESSES_PER_ACCOUNT {
            return Err(WalletError::TooManyAddresses(format!(
                "syncing to index {sync_to_index} would exceed the maximum of \
                 {MAX_ADDRESSES_PER_ACCOUNT} addresses per account"
            )));
        }

        let info = self.load_account_info(&mut inner, tx, account)?;
        let branch_xpub = info
            .acct_key_pub
            .child(branch)
            .map_err(|e| WalletError::keychain("failed to derive branch xpub", e))?;

        let mut child = sync_to_index;
        loop {
            match branch_xpub.child(child) {
                // An invalid child slot is simply unused.
                Err(KeychainError::InvalidChild) => {}
                Err(err) => {
                    return Err(WalletError::keychain("failed to derive child xpub", err))
                }
                Ok(xpub_child) => {
                    let addr = xpub_child
                        .address(self.chain_params)
                        .map_err(|e| WalletError::keychain("failed to derive address", e))?;
                    let hash = addr.hash160();
                    match schema::fetch_address(tx, &hash) {
                        // Found: all earlier children already exist.
                        Ok(_) => break,
                        Err(WalletError::NotFound(_)) => {
                            schema::put_chained_address(tx, &hash, account, branch, child);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            if child == 0 {
                break;
            }
            child -= 1;
        }
        Ok(())
    }

    /// Record that an address has been observed in use, raising the
    /// account's last-used (and, transitively, last-returned) index for the
    /// branch.  Indexes never decrease; calling with an older address is a
    /// no-op, as is calling with any non-chained address.
    pub fn mark_used(&self, tx: &WriteTxn<'_>, address: &Address) -> WalletResult<()> {
        self.check_open()?;
        let hash = address.normalize().hash160();
        let row = match schema::fetch_address(tx, &hash)? {
            AddressRow::Chained(row) => row,
            // Imported and script addresses carry no branch bookkeeping.
            _ => return Ok(()),
        };
        let mut acct_row = schema::fetch_account_info(tx, row.account)?;

        let mut last_used_ext = acct_row.last_used_external_index;
        let mut last_used_int = acct_row.last_used_internal_index;
        match row.branch {
            EXTERNAL_BRANCH => last_used_ext = row.index,
            INTERNAL_BRANCH => last_used_int = row.index,
            _ => {
                return Err(WalletError::Data(
                    "address row records unsupported account branch".into(),
                ))
            }
        }
        apply_used_indexes(&mut acct_row, last_used_ext, last_used_int);
        schema::put_account_row(tx, row.account, &acct_row);
        Ok(())
    }

    /// [`Manager::mark_used`] by explicit account, branch, and child index.
    pub fn mark_used_child_index(
        &self,
        tx: &WriteTxn<'_>,
        account: u32,
        branch: u32,
        child: u32,
    ) -> WalletResult<()> {
        self.check_open()?;
        let mut acct_row = schema::fetch_account_info(tx, account)?;

        let mut last_used_ext = acct_row.last_used_external_index;
        let mut last_used_int = acct_row.last_used_internal_index;
        match branch {
            EXTERNAL_BRANCH => last_used_ext = child,
            INTERNAL_BRANCH => last_used_int = child,
            _ => return Err(WalletError::Branch),
        }
        apply_used_indexes(&mut acct_row, last_used_ext, last_used_int);
        schema::put_account_row(tx, account, &acct_row);
        Ok(())
    }

    /// Record that a child index has been handed to a caller.  The
    /// last-returned index never decreases and never drops below the
    /// last-used index.
    pub fn mark_returned_child_index(
        &self,
        tx: &WriteTxn<'_>,
        account: u32,
        branch: u32,
        child: u32,
    ) -> WalletResult<()> {
        self.check_open()?;
        let mut acct_row = schema::fetch_account_info(tx, account)?;

        let mut last_ret_ext = acct_row.last_returned_external_index;
        let mut last_ret_int = acct_row.last_returned_internal_index;
        match branch {
            EXTERNAL_BRANCH => last_ret_ext = child,
            INTERNAL_BRANCH => last_ret_int = child,
            _ => return Err(WalletError::Branch),
        }

        // The +1 wraparound orders the no-address sentinel below index 0.
        if last_ret_ext.wrapping_add(1) < acct_row.last_returned_external_index.wrapping_add(1)
            || last_ret_int.wrapping_add(1) < acct_row.last_returned_internal_index.wrapping_add(1)
        {
            return Ok(());
        }

        acct_row.last_returned_external_index = max_wrapping(
            acct_row.last_used_external_index,
            last_ret_ext,
        );
        acct_row.last_returned_internal_index = max_wrapping(
            acct_row.last_used_internal_index,
            last_ret_int,
        );
        schema::put_account_row(tx, account, &acct_row);
        Ok(())
    }

    /// The next-to-use address pool index for an account branch.
    pub fn next_to_use_addr_pool_index(
        &self,
        tx: &impl ReadView,
        internal: bool,
        account: u32,
    ) -> WalletResult<u32> {
        self.check_open()?;
        schema::fetch_next_to_use_addr_pool_idx(tx, internal, account)
    }

    /// Store the next-to-use address pool index for an account branch.
    pub fn put_next_to_use_addr_pool_index(
        &self,
        tx: &WriteTxn<'_>,
        internal: bool,
        account: u32,
        index: u32,
    ) -> WalletResult<()> {
        self.check_open()?;
        schema::put_next_to_use_addr_pool_idx(tx, internal, account, index);
        Ok(())
    }

    // -- address lookup ------------------------------------------------------

    /// Materialise the managed address for a known address.  Pubkey-form
    /// addresses are normalised to pay-to-pubkey-hash first so callers can
    /// use either form.
    pub fn address(&self, tx: &impl ReadView, address: &Address) -> WalletResult<ManagedAddress> {
        let hash = address.normalize().hash160();
        let mut inner = self.state_write()?;
        let row = schema::fetch_address(tx, &hash)?;
        self.row_to_managed(&mut inner, tx, &row)
    }

    /// The account an address belongs to.
    pub fn addr_account(&self, tx: &impl ReadView, address: &Address) -> WalletResult<u32> {
        self.check_open()?;
        schema::fetch_addr_account(tx, &address.normalize().hash160())
    }

    /// Whether the address hash is known to the manager.
    pub fn exists_address(
        &self,
        tx: &impl ReadView,
        hash: &[u8; HASH160_SIZE],
    ) -> WalletResult<bool> {
        self.check_open()?;
        schema::exists_address(tx, hash)
    }

    /// Call `f` with each address of an account, stopping early on error.
    ///
    /// The state lock is not held across `f`, so the callback may re-enter
    /// the manager.
    pub fn for_each_account_address(
        &self,
        tx: &impl ReadView,
        account: u32,
        mut f: impl FnMut(ManagedAddress) -> WalletResult<()>,
    ) -> WalletResult<()> {
        self.check_open()?;
        for (_, row) in schema::account_address_rows(tx, account)? {
            let managed = {
                let mut inner = self.state_write()?;
                self.row_to_managed(&mut inner, tx, &row)?
            };
            f(managed)?;
        }
        Ok(())
    }

    /// Call `f` with each active address of an account.
    pub fn for_each_active_account_address(
        &self,
        tx: &impl ReadView,
        account: u32,
        f: impl FnMut(ManagedAddress) -> WalletResult<()>,
    ) -> WalletResult<()> {
        self.for_each_account_address(tx, account, f)
    }

    /// Call `f` with each active address in the manager, stopping early on
    /// error.
    pub fn for_each_active_address(
        &self,
        tx: &impl ReadView,
        mut f: impl FnMut(&Address) -> WalletResult<()>,
    ) -> WalletResult<()> {
        self.check_open()?;
        for (_, row) in schema::all_address_rows(tx)? {
            let managed = {
                let mut inner = self.state_write()?;
                self.row_to_managed(&mut inner, tx, &row)?
            };
            f(managed.address())?;
        }
        Ok(())
    }

    // -- secrets -------------------------------------------------------------

    /// The private key for a P2PK or P2PKH address.
    ///
    /// The returned guard registers the key in the returned-secrets set and
    /// holds its read lock; [`Manager::lock`] blocks until the guard drops,
    /// then zeroes the key.  Dropping the guard is mandatory; holding it
    /// across a lock attempt on the same thread deadlocks.
    pub fn private_key<'m>(
        &'m self,
        tx: &impl ReadView,
        address: &Address,
    ) -> WalletResult<PrivKeyGuard<'m>> {
        let mut inner = self.state_write()?;
        if inner.watching_only {
            return Err(WalletError::WatchingOnly);
        }
        if inner.locked {
            return Err(WalletError::Locked);
        }

        let hash = address.normalize().hash160();

        // Hand the same key out again if it is already registered.
        {
            let secrets = self.returned_secrets.read();
            if secrets.priv_keys.contains_key(&hash) {
                return Ok(PrivKeyGuard { secrets, hash });
            }
        }

        let key = match schema::fetch_address(tx, &hash)? {
            AddressRow::Chained(row) => {
                let xpriv = self.derive_key_from_path(
                    &mut inner, tx, row.account, row.branch, row.index, true,
                )?;
                // ec_privkey copies the scalar; the extended key zeroes
                // itself when dropped.
                xpriv.ec_privkey().map_err(|e| {
                    WalletError::keychain("failed to create private key from xpriv", e)
                })?
            }
            AddressRow::ImportedKey(row) => {
                if row.enc_privkey.is_empty() {
                    return Err(WalletError::WatchingOnly);
                }
                let decrypted = Zeroizing::new(
                    inner.crypto_key_priv.decrypt(&row.enc_privkey).map_err(|e| {
                        WalletError::crypto("failed to decrypt imported private key", e)
                    })?,
                );
                PrivateKey::from_slice(&decrypted).map_err(|_| WalletError::Crypto {
                    desc: "invalid imported private key".into(),
                    source: None,
                })?
            }
            AddressRow::ImportedScript(_) => {
                return Err(WalletError::Input(
                    "private keys can only be returned for P2PK and P2PKH addresses".into(),
                ))
            }
        };

        let mut secrets = self.returned_secrets.write();
        secrets.priv_keys.insert(hash, key);
        let secrets = RwLockWriteGuard::downgrade(secrets);
        Ok(PrivKeyGuard { secrets, hash })
    }

    /// The redeem script for a P2SH address.  The same release rules as
    /// [`Manager::private_key`] apply.
    pub fn redeem_script<'m>(
        &'m self,
        tx: &impl ReadView,
        address: &Address,
    ) -> WalletResult<ScriptGuard<'m>> {
        let inner = self.state_write()?;
        if inner.watching_only {
            return Err(WalletError::WatchingOnly);
        }
        if inner.locked {
            return Err(WalletError::Locked);
        }

        let hash = address.normalize().hash160();

        {
            let secrets = self.returned_secrets.read();
            if secrets.scripts.contains_key(&hash) {
                return Ok(ScriptGuard { secrets, hash });
            }
        }

        let script = match schema::fetch_address(tx, &hash)? {
            AddressRow::ImportedScript(row) => {
                if row.enc_script.is_empty() {
                    return Err(WalletError::WatchingOnly);
                }
                inner
                    .crypto_key_script
                    .decrypt(&row.enc_script)
                    .map_err(|e| WalletError::crypto("failed to decrypt imported script", e))?
            }
            AddressRow::Chained(_) | AddressRow::ImportedKey(_) => {
                return Err(WalletError::Input(
                    "redeem scripts can only be returned for P2SH addresses".into(),
                ))
            }
        };

        let mut secrets = self.returned_secrets.write();
        secrets.scripts.insert(hash, script);
        let secrets = RwLockWriteGuard::downgrade(secrets);
        Ok(ScriptGuard { secrets, hash })
    }

    /// Encrypt `data` under the selected crypto key.
    pub fn encrypt(&self, key_kind: CryptoKeyKind, data: &[u8]) -> WalletResult<Vec<u8>> {
        let inner = self.state_read()?;
        let key = select_crypto_key(&inner, key_kind)?;
        key.encrypt(data)
            .map_err(|e| WalletError::crypto("failed to encrypt", e))
    }

    /// Decrypt `data` under the selected crypto key.
    pub fn decrypt(&self, key_kind: CryptoKeyKind, data: &[u8]) -> WalletResult<Vec<u8>> {
        let inner = self.state_read()?;
        let key = select_crypto_key(&inner, key_kind)?;
        key.decrypt(data)
            .map_err(|e| WalletError::crypto("failed to decrypt", e))
    }

    // -- imports -------------------------------------------------------------

    /// Import a WIF private key.  The address joins the reserved imported
    /// account.  On a watching-only manager only the public key is stored.
    pub fn import_private_key(
        &self,
        tx: &WriteTxn<'_>,
        wif: &Wif,
    ) -> WalletResult<ManagedAddress> {
        if !wif.is_for_net(self.chain_params) {
            return Err(WalletError::WrongNet(format!(
                "private key is not for {}",
                self.chain_params.name
            )));
        }

        let inner = self.state_write()?;
        if inner.locked && !inner.watching_only {
            return Err(WalletError::Locked);
        }

        let serialized_pubkey = wif.serialized_pubkey();
        let hash = aero_keychain::hash160(&serialized_pubkey);
        if schema::exists_address(tx, &hash)? {
            return Err(WalletError::DuplicateAddress(format!(
                "address for public key {} already exists",
                hex::encode(&serialized_pubkey)
            )));
        }

        let enc_pubkey = inner
            .crypto_key_pub
            .encrypt(&serialized_pubkey)
            .map_err(|e| WalletError::crypto("failed to encrypt imported public key", e))?;
        let enc_privkey = if inner.watching_only {
            Vec::new()
        } else {
            let priv_bytes = Zeroizing::new(wif.priv_key().secret_bytes());
            inner
                .crypto_key_priv
                .encrypt(priv_bytes.as_slice())
                .map_err(|e| WalletError::crypto("failed to encrypt imported private key", e))?
        };

        schema::put_imported_address(tx, &hash, IMPORTED_ADDR_ACCOUNT, enc_pubkey, enc_privkey);

        let pubkey = PublicKey::from_slice(&serialized_pubkey)
            .map_err(|e| WalletError::keychain("invalid imported public key", KeychainError::Secp(e.to_string())))?;
        info!(address = %Address::p2pkh(hash, self.chain_params).encode(), "Imported private key");
        Ok(ManagedAddress::ImportedKey {
            address: Address::p2pkh(hash, self.chain_params),
            account: IMPORTED_ADDR_ACCOUNT,
            pubkey,
            compressed: wif.compressed(),
        })
    }

    /// Import a redeem script, creating its pay-to-script-hash address in
    /// the reserved imported account.  On a watching-only manager only the
    /// script hash is stored.
    pub fn import_script(&self, tx: &WriteTxn<'_>, script: &[u8]) -> WalletResult<ManagedAddress> {
        let inner = self.state_write()?;
        if inner.locked && !inner.watching_only {
            return Err(WalletError::Locked);
        }

        let hash = aero_keychain::hash160(script);
        if schema::exists_address(tx, &hash)? {
            return Err(WalletError::DuplicateAddress(format!(
                "address for script hash {} already exists",
                hex::encode(hash)
            )));
        }

        // The script hash is wrapped under the public key so the address
        // stays readable while locked or watching-only.
        let enc_hash = inner
            .crypto_key_pub
            .encrypt(&hash)
            .map_err(|e| WalletError::crypto("failed to encrypt script hash", e))?;
        let enc_script = if inner.watching_only {
            Vec::new()
        } else {
            inner
                .crypto_key_script
                .encrypt(script)
                .map_err(|e| WalletError::crypto("failed to encrypt script", e))?
        };

        schema::put_script_address(tx, &hash, IMPORTED_ADDR_ACCOUNT, enc_hash, enc_script);

        info!(address = %Address::p2sh(hash, self.chain_params).encode(), "Imported script");
        Ok(ManagedAddress::ImportedScript {
            address: Address::p2sh(hash, self.chain_params),
            account: IMPORTED_ADDR_ACCOUNT,
        })
    }

    // -- internal helpers ----------------------------------------------------

    fn state_write(&self) -> WalletResult<RwLockWriteGuard<'_, Inner>> {
        let inner = self.state.write();
        if inner.closed {
            return Err(WalletError::closed());
        }
        Ok(inner)
    }

    fn state_read(&self) -> WalletResult<RwLockReadGuard<'_, Inner>> {
        let inner = self.state.read();
        if inner.closed {
            return Err(WalletError::closed());
        }
        Ok(inner)
    }

    fn check_open(&self) -> WalletResult<()> {
        self.state_read().map(|_| ())
    }

    /// Best-effort removal of every private-tier secret from memory.
    ///
    /// Blocks on the returned-secrets write lock, so every handed-out key
    /// and script must have been released first.
    fn lock_inner(inner: &mut Inner, returned: &RwLock<ReturnedSecrets>) {
        for info in inner.acct_info.values_mut() {
            if let Some(key) = info.acct_key_priv.as_mut() {
                key.zero();
            }
            info.acct_key_priv = None;
        }

        returned.write().zero_and_clear();

        // The crypto public key intentionally stays unwrapped so public data
        // remains readable while locked.
        inner.crypto_key_script.zero();
        inner.crypto_key_priv.zero();
        if let Some(master) = inner.master_key_priv.as_mut() {
            master.zero();
        }
        inner.hashed_priv_passphrase.zeroize();
        inner.locked = true;
    }

    /// Decrypt and parse the private extended key of a cached account.
    fn decrypt_account_priv(
        inner: &Inner,
        account: u32,
        params: &NetParams,
    ) -> WalletResult<ExtendedKey> {
        let info = match inner.acct_info.get(&account) {
            Some(info) => info,
            None => return Err(WalletError::NotFound(format!("account {account} not found"))),
        };
        let decrypted = Zeroizing::new(
            inner
                .crypto_key_priv
                .decrypt(&info.acct_key_encrypted)
                .map_err(|e| {
                    WalletError::crypto(
                        format!("failed to decrypt account {account} private key"),
                        e,
                    )
                })?,
        );
        let text = std::str::from_utf8(&decrypted)
            .map_err(|_| WalletError::Data("account private key is not valid utf-8".into()))?;
        ExtendedKey::parse(text, params).map_err(|e| {
            WalletError::keychain(
                format!("failed to regenerate account {account} extended key"),
                e,
            )
        })
    }

    /// Load and cache the derivation state of an account.
    fn load_account_info<'a>(
        &self,
        inner: &'a mut Inner,
        tx: &impl ReadView,
        account: u32,
    ) -> WalletResult<&'a AccountInfo> {
        if !inner.acct_info.contains_key(&account) {
            let row = schema::fetch_account_info(tx, account)?;
            let serialized = Zeroizing::new(
                inner.crypto_key_pub.decrypt(&row.pub_key_enc).map_err(|e| {
                    WalletError::crypto(
                        format!("failed to decrypt public key for account {account}"),
                        e,
                    )
                })?,
            );
            let text = std::str::from_utf8(&serialized)
                .map_err(|_| WalletError::Data("account public key is not valid utf-8".into()))?;
            let acct_key_pub = ExtendedKey::parse(text, self.chain_params).map_err(|e| {
                WalletError::keychain(
                    format!("failed to create extended public key for account {account}"),
                    e,
                )
            })?;

            inner.acct_info.insert(
                account,
                AccountInfo {
                    name: row.name,
                    acct_key_encrypted: row.priv_key_enc,
                    acct_key_priv: None,
                    acct_key_pub,
                },
            );
            if !inner.locked {
                let key = Self::decrypt_account_priv(inner, account, self.chain_params)?;
                if let Some(info) = inner.acct_info.get_mut(&account) {
                    info.acct_key_priv = Some(key);
                }
            }
        }
        inner
            .acct_info
            .get(&account)
            .ok_or_else(|| WalletError::NotFound(format!("account {account} not found")))
    }

    /// Derive the extended key at `m/44'/coin_type'/account'/branch/index`,
    /// public or private per the flag.
    fn derive_key_from_path(
        &self,
        inner: &mut Inner,
        tx: &impl ReadView,
        account: u32,
        branch: u32,
        index: u32,
        private: bool,
    ) -> WalletResult<ExtendedKey> {
        let info = self.load_account_info(inner, tx, account)?;
        let acct_key = if private {
            info.acct_key_priv.as_ref().ok_or(WalletError::Locked)?
        } else {
            &info.acct_key_pub
        };
        let branch_key = acct_key.child(branch).map_err(|e| {
            WalletError::keychain(format!("failed to derive extended key branch {branch}"), e)
        })?;
        // The branch key zeroes itself when dropped at the end of this call.
        branch_key.child(index).map_err(|e| {
            WalletError::keychain(
                format!("failed to derive child extended key branch {branch} child {index}"),
                e,
            )
        })
    }

    /// Decrypt the coin-type private key from the store.
    fn decrypt_coin_type_priv(
        &self,
        inner: &Inner,
        tx: &impl ReadView,
    ) -> WalletResult<ExtendedKey> {
        let (_, coin_type_priv_enc) = schema::fetch_coin_type_keys(tx)?;
        let coin_type_priv_enc = coin_type_priv_enc.ok_or(WalletError::WatchingOnly)?;
        let decrypted = Zeroizing::new(
            inner
                .crypto_key_priv
                .decrypt(&coin_type_priv_enc)
                .map_err(|e| {
                    WalletError::crypto("failed to decrypt cointype private key", e)
                })?,
        );
        let text = std::str::from_utf8(&decrypted)
            .map_err(|_| WalletError::Data("cointype private key is not valid utf-8".into()))?;
        ExtendedKey::parse(text, self.chain_params).map_err(|e| {
            WalletError::keychain("failed to create cointype extended private key", e)
        })
    }

    /// Materialise a managed address from its persisted row.
    fn row_to_managed(
        &self,
        inner: &mut Inner,
        tx: &impl ReadView,
        row: &AddressRow,
    ) -> WalletResult<ManagedAddress> {
        match row {
            AddressRow::Chained(row) => {
                let xpub = self.derive_key_from_path(
                    inner, tx, row.account, row.branch, row.index, false,
                )?;
                let pubkey = xpub
                    .ec_pubkey()
                    .map_err(|e| WalletError::keychain("failed to derive public key", e))?;
                let address = xpub
                    .address(self.chain_params)
                    .map_err(|e| WalletError::keychain("failed to derive address", e))?;
                Ok(ManagedAddress::Chained {
                    address,
                    account: row.account,
                    branch: row.branch,
                    index: row.index,
                    pubkey,
                })
            }
            AddressRow::ImportedKey(row) => {
                let pub_bytes = inner.crypto_key_pub.decrypt(&row.enc_pubkey).map_err(|e| {
                    WalletError::crypto("failed to decrypt public key for imported address", e)
                })?;
                let pubkey = PublicKey::from_slice(&pub_bytes).map_err(|_| {
                    WalletError::Data("invalid public key for imported address".into())
                })?;
                let compressed = pub_bytes.len() == 33;
                Ok(ManagedAddress::ImportedKey {
                    address: Address::p2pkh(aero_keychain::hash160(&pub_bytes), self.chain_params),
                    account: row.account,
                    pubkey,
                    compressed,
                })
            }
            AddressRow::ImportedScript(row) => {
                let hash_bytes = inner.crypto_key_pub.decrypt(&row.enc_hash).map_err(|e| {
                    WalletError::crypto("failed to decrypt imported script hash", e)
                })?;
                if hash_bytes.len() != HASH160_SIZE {
                    return Err(WalletError::Data("malformed imported script hash".into()));
                }
                let mut hash = [0u8; HASH160_SIZE];
                hash.copy_from_slice(&hash_bytes);
                Ok(ManagedAddress::ImportedScript {
                    address: Address::p2sh(hash, self.chain_params),
                    account: row.account,
                })
            }
        }
    }
}

// -- free helpers ------------------------------------------------------------

fn hash_passphrase(salt: &[u8; SALT_SIZE], passphrase: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(passphrase);
    hasher.finalize().into()
}

fn select_crypto_key<'a>(inner: &'a Inner, kind: CryptoKeyKind) -> WalletResult<&'a CryptoKey> {
    match kind {
        CryptoKeyKind::Private | CryptoKeyKind::Script => {
            if inner.watching_only {
                return Err(WalletError::WatchingOnly);
            }
            if inner.locked {
                return Err(WalletError::Locked);
            }
        }
        CryptoKeyKind::Public => {}
    }
    Ok(match kind {
        CryptoKeyKind::Public => &inner.crypto_key_pub,
        CryptoKeyKind::Private => &inner.crypto_key_priv,
        CryptoKeyKind::Script => &inner.crypto_key_script,
    })
}

/// Maximum of two branch indexes under the sentinel wraparound ordering,
/// where `NO_ADDRESS_INDEX + 1 == 0` sorts below every real index.
fn max_wrapping(a: u32, b: u32) -> u32 {
    if a.wrapping_add(1) > b.wrapping_add(1) {
        a
    } else {
        b
    }
}

/// Raise the last-used indexes and pull the last-returned indexes up to at
/// least match, skipping the write when a newer index is already recorded.
fn apply_used_indexes(row: &mut AccountRow, last_used_ext: u32, last_used_int: u32) {
    if last_used_ext.wrapping_add(1) < row.last_used_external_index.wrapping_add(1)
        || last_used_int.wrapping_add(1) < row.last_used_internal_index.wrapping_add(1)
    {
        return;
    }
    row.last_returned_external_index =
        max_wrapping(last_used_ext, row.last_returned_external_index);
    row.last_returned_internal_index =
        max_wrapping(last_used_int, row.last_returned_internal_index);
    row.last_used_external_index = last_used_ext;
    row.last_used_internal_index = last_used_int;
}

/// A fresh account row: nothing used, nothing returned.  The last-returned
/// indexes persist as zero rather than the sentinel; under the wraparound
/// ordering (`sentinel + 1 == 0`) the two encodings agree that no address
/// has been returned.
fn new_account_row(pub_key_enc: Vec<u8>, priv_key_enc: Vec<u8>, name: &str) -> AccountRow {
    AccountRow {
        pub_key_enc,
        priv_key_enc,
        last_used_external_index: NO_ADDRESS_INDEX,
        last_used_internal_index: NO_ADDRESS_INDEX,
        last_returned_external_index: 0,
        last_returned_internal_index: 0,
        name: name.to_string(),
    }
}

/// Derive the coin-type key at `m/44'/coin_type'`.
fn derive_coin_type_key(root: &ExtendedKey, coin_type: u32) -> WalletResult<ExtendedKey> {
    if coin_type > MAX_COIN_TYPE {
        return Err(WalletError::CoinTypeTooHigh);
    }
    let purpose = root
        .child(44 + HARDENED_KEY_START)
        .map_err(|e| WalletError::keychain("failed to derive purpose extended key", e))?;
    purpose
        .child(coin_type + HARDENED_KEY_START)
        .map_err(|e| WalletError::keychain("failed to derive cointype extended key", e))
}

/// Derive the account key at `m/44'/coin_type'/account'`.  An invalid child
/// here means the seed cannot produce the required hierarchy.
fn derive_account_key(coin_type_key: &ExtendedKey, account: u32) -> WalletResult<ExtendedKey> {
    if account > MAX_ACCOUNT_NUM {
        return Err(WalletError::AccountNumTooHigh);
    }
    match coin_type_key.child(account + HARDENED_KEY_START) {
        Ok(key) => Ok(key),
        Err(KeychainError::InvalidChild) => Err(WalletError::keychain(
            "the provided seed is unusable",
            KeychainError::InvalidChild,
        )),
        Err(err) => Err(WalletError::keychain(
            "failed to derive account extended key",
            err,
        )),
    }
}

/// Ensure both branch keys derive from an account key.  A seed that cannot
/// produce either branch is rejected as unusable.
fn check_branch_keys(acct_key: &ExtendedKey) -> WalletResult<()> {
    for branch in [EXTERNAL_BRANCH, INTERNAL_BRANCH] {
        match acct_key.child(branch) {
            Ok(_) => {}
            Err(KeychainError::InvalidChild) => {
                return Err(WalletError::keychain(
                    "the provided seed is unusable",
                    KeychainError::InvalidChild,
                ))
            }
            Err(err) => {
                return Err(WalletError::keychain("failed to derive branch key", err))
            }
        }
    }
    Ok(())
}

fn new_manager(
    params: &'static NetParams,
    factories: CryptoFactories,
    watching_only: bool,
    master_key_pub: SecretKey,
    master_key_priv: Option<SecretKey>,
    crypto_key_pub: CryptoKey,
    crypto_key_priv_encrypted: Vec<u8>,
    crypto_key_script_encrypted: Vec<u8>,
    priv_passphrase_salt: [u8; SALT_SIZE],
) -> Manager {
    Manager {
        state: RwLock::new(Inner {
            watching_only,
            locked: true,
            closed: false,
            acct_info: HashMap::new(),
            master_key_pub,
            master_key_priv,
            crypto_key_pub,
            crypto_key_priv_encrypted,
            crypto_key_priv: CryptoKey::zeroed(),
            crypto_key_script_encrypted,
            crypto_key_script: CryptoKey::zeroed(),
            priv_passphrase_salt,
            hashed_priv_passphrase: [0u8; 64],
        }),
        returned_secrets: RwLock::new(ReturnedSecrets::default()),
        chain_params: params,
        factories,
    }
}

/// Load an existing manager from the store.  The public passphrase derives
/// the master public key, which unwraps the crypto public key; everything
/// private stays wrapped until unlock.
fn load_manager(
    tx: &impl ReadView,
    pub_passphrase: &[u8],
    params: &'static NetParams,
    factories: CryptoFactories,
) -> WalletResult<Manager> {
    if !schema::manager_exists(tx)? {
        return Err(WalletError::NotFound(
            "the address manager does not exist".into(),
        ));
    }
    let version = schema::fetch_db_version(tx)?;
    if version > DB_VERSION {
        return Err(WalletError::Data(format!(
            "database version {version} is newer than the latest understood version {DB_VERSION}"
        )));
    }

    let watching_only = schema::fetch_watching_only(tx)?;
    let (master_pub_params, master_priv_params) = schema::fetch_master_key_params(tx)?;
    let (crypto_pub_enc, crypto_priv_enc, crypto_script_enc) = schema::fetch_crypto_keys(tx)?;

    // The private master key parameters load now, but the key itself is not
    // derived until unlock.
    let master_key_priv = if watching_only {
        None
    } else {
        let marshalled = master_priv_params.ok_or_else(|| {
            WalletError::NotFound("master private key parameters not found".into())
        })?;
        Some(
            SecretKey::unmarshal(&marshalled)
                .map_err(|e| WalletError::crypto("failed to unmarshal master private key", e))?,
        )
    };

    let mut master_key_pub = SecretKey::unmarshal(&master_pub_params)
        .map_err(|e| WalletError::crypto("failed to unmarshal master public key", e))?;
    match master_key_pub.derive(pub_passphrase) {
        Ok(()) => {}
        Err(CryptoError::WrongPassphrase) => {
            return Err(WalletError::WrongPassphrase(
                "invalid passphrase for public master key".into(),
            ))
        }
        Err(err) => {
            return Err(WalletError::crypto("failed to derive public master key", err))
        }
    }

    let decrypted = Zeroizing::new(
        master_key_pub
            .decrypt(&crypto_pub_enc)
            .map_err(|e| WalletError::crypto("failed to decrypt crypto public key", e))?,
    );
    let mut crypto_key_pub = CryptoKey::zeroed();
    crypto_key_pub
        .copy_from(&decrypted)
        .map_err(|e| WalletError::crypto("malformed crypto public key", e))?;
    drop(decrypted);

    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    debug!(network = params.name, watching_only, "Address manager opened");
    Ok(new_manager(
        params,
        factories,
        watching_only,
        master_key_pub,
        master_key_priv,
        crypto_key_pub,
        crypto_priv_enc.unwrap_or_default(),
        crypto_script_enc.unwrap_or_default(),
        salt,
    ))
}

/// Create a new full address manager in the store.
fn create_address_manager(
    tx: &WriteTxn<'_>,
    seed: &[u8],
    pub_passphrase: &[u8],
    priv_passphrase: &[u8],
    params: &'static NetParams,
    options: &ScryptOptions,
    factories: &CryptoFactories,
) -> WalletResult<()> {
    if schema::manager_exists(tx)? {
        return Err(WalletError::AlreadyExists);
    }
    if priv_passphrase.is_empty() {
        return Err(WalletError::EmptyPassphrase);
    }
    schema::create_manager_ns(tx);

    // Walk the BIP0044 hierarchy once to prove the seed can produce it.
    let root = ExtendedKey::new_master(seed, params)
        .map_err(|e| WalletError::keychain("failed to derive master extended key", e))?;
    let coin_type_key_priv = derive_coin_type_key(&root, params.hd_coin_type)?;
    let acct_key_priv = derive_account_key(&coin_type_key_priv, 0)?;
    check_branch_keys(&acct_key_priv)?;
    let acct_key_pub = acct_key_priv
        .neuter()
        .map_err(|e| WalletError::keychain("failed to neuter account key", e))?;

    // Master keys protect the crypto keys; crypto keys protect the data.
    let master_key_pub = (factories.secret_key)(pub_passphrase, options)
        .map_err(|e| WalletError::crypto("failed to create master public key", e))?;
    let master_key_priv = (factories.secret_key)(priv_passphrase, options)
        .map_err(|e| WalletError::crypto("failed to create master private key", e))?;

    let crypto_key_pub = (factories.crypto_key)()
        .map_err(|e| WalletError::crypto("failed to generate crypto public key", e))?;
    let crypto_key_priv = (factories.crypto_key)()
        .map_err(|e| WalletError::crypto("failed to generate crypto private key", e))?;
    let crypto_key_script = (factories.crypto_key)()
        .map_err(|e| WalletError::crypto("failed to generate crypto script key", e))?;

    let crypto_pub_enc = encrypt_key_bytes(&master_key_pub, &crypto_key_pub, "crypto public key")?;
    let crypto_priv_enc =
        encrypt_key_bytes(&master_key_priv, &crypto_key_priv, "crypto private key")?;
    let crypto_script_enc =
        encrypt_key_bytes(&master_key_priv, &crypto_key_script, "crypto script key")?;

    // Wrap the coin-type keys under the crypto keys.
    let coin_type_key_pub = coin_type_key_priv
        .neuter()
        .map_err(|e| WalletError::keychain("failed to neuter cointype key", e))?;
    let serialized = Zeroizing::new(coin_type_key_pub.serialize());
    let coin_type_pub_enc = crypto_key_pub
        .encrypt(serialized.as_bytes())
        .map_err(|e| WalletError::crypto("failed to encrypt cointype public key", e))?;
    let serialized = Zeroizing::new(coin_type_key_priv.serialize());
    let coin_type_priv_enc = crypto_key_priv
        .encrypt(serialized.as_bytes())
        .map_err(|e| WalletError::crypto("failed to encrypt cointype private key", e))?;

    // Wrap the default account keys.
    let serialized = Zeroizing::new(acct_key_pub.serialize());
    let acct_pub_enc = crypto_key_pub
        .encrypt(serialized.as_bytes())
        .map_err(|e| WalletError::crypto("failed to encrypt public key for account 0", e))?;
    let serialized = Zeroizing::new(acct_key_priv.serialize());
    let acct_priv_enc = crypto_key_priv
        .encrypt(serialized.as_bytes())
        .map_err(|e| WalletError::crypto("failed to encrypt private key for account 0", e))?;

    let master_pub_params = master_key_pub.marshal();
    let master_priv_params = master_key_priv.marshal();
    schema::put_master_key_params(
        tx,
        Some(master_pub_params.as_slice()),
        Some(master_priv_params.as_slice()),
    );
    schema::put_crypto_keys(
        tx,
        Some(crypto_pub_enc.as_slice()),
        Some(crypto_priv_enc.as_slice()),
        Some(crypto_script_enc.as_slice()),
    );
    schema::put_coin_type_keys(tx, &coin_type_pub_enc, &coin_type_priv_enc);
    schema::put_watching_only(tx, false);
    schema::put_next_to_use_addr_pool_idx(tx, false, DEFAULT_ACCOUNT_NUM, 0);
    schema::put_next_to_use_addr_pool_idx(tx, true, DEFAULT_ACCOUNT_NUM, 0);
    schema::put_last_account(tx, DEFAULT_ACCOUNT_NUM);

    let imported_row = new_account_row(Vec::new(), Vec::new(), IMPORTED_ADDR_ACCOUNT_NAME);
    schema::put_account_info(tx, IMPORTED_ADDR_ACCOUNT, &imported_row);
    let default_row = new_account_row(acct_pub_enc, acct_priv_enc, DEFAULT_ACCOUNT_NAME);
    schema::put_account_info(tx, DEFAULT_ACCOUNT_NUM, &default_row);

    info!(network = params.name, "Created address manager");
    Ok(())
}

/// Create a new watching-only address manager in the store.  A dummy master
/// private key derived from the public passphrase wraps the crypto
/// private/script keys so the layout matches a full manager, but no wallet
/// private material exists under them and unlock stays rejected.
fn create_watch_only(
    tx: &WriteTxn<'_>,
    acct_xpub: &str,
    pub_passphrase: &[u8],
    params: &'static NetParams,
    options: &ScryptOptions,
    factories: &CryptoFactories,
) -> WalletResult<()> {
    if schema::manager_exists(tx)? {
        return Err(WalletError::AlreadyExists);
    }
    schema::create_manager_ns(tx);

    let acct_key_pub = match ExtendedKey::parse(acct_xpub, params) {
        Ok(key) => key,
        Err(KeychainError::WrongNet(desc)) => return Err(WalletError::WrongNet(desc)),
        Err(err) => {
            return Err(WalletError::keychain(
                "failed to parse account extended public key",
                err,
            ))
        }
    };
    if acct_key_pub.is_private() {
        return Err(WalletError::Input(
            "an extended public key is required".into(),
        ));
    }
    check_branch_keys(&acct_key_pub)?;

    let master_key_pub = (factories.secret_key)(pub_passphrase, options)
        .map_err(|e| WalletError::crypto("failed to create master public key", e))?;
    let master_key_priv = (factories.secret_key)(pub_passphrase, options)
        .map_err(|e| WalletError::crypto("failed to create master pseudoprivate key", e))?;

    let crypto_key_pub = (factories.crypto_key)()
        .map_err(|e| WalletError::crypto("failed to generate crypto public key", e))?;
    let crypto_key_priv = (factories.crypto_key)()
        .map_err(|e| WalletError::crypto("failed to generate crypto private key", e))?;
    let crypto_key_script = (factories.crypto_key)()
        .map_err(|e| WalletError::crypto("failed to generate crypto script key", e))?;

    let crypto_pub_enc = encrypt_key_bytes(&master_key_pub, &crypto_key_pub, "crypto public key")?;
    let crypto_priv_enc =
        encrypt_key_bytes(&master_key_priv, &crypto_key_priv, "crypto private key")?;
    let crypto_script_enc =
        encrypt_key_bytes(&master_key_priv, &crypto_key_script, "crypto script key")?;

    let serialized = Zeroizing::new(acct_key_pub.serialize());
    let acct_pub_enc = crypto_key_pub
        .encrypt(serialized.as_bytes())
        .map_err(|e| WalletError::crypto("failed to encrypt public key for account 0", e))?;

    let master_pub_params = master_key_pub.marshal();
    let master_priv_params = master_key_priv.marshal();
    schema::put_master_key_params(
        tx,
        Some(master_pub_params.as_slice()),
        Some(master_priv_params.as_slice()),
    );
    schema::put_crypto_keys(
        tx,
        Some(crypto_pub_enc.as_slice()),
        Some(crypto_priv_enc.as_slice()),
        Some(crypto_script_enc.as_slice()),
    );
    schema::put_watching_only(tx, true);
    schema::put_next_to_use_addr_pool_idx(tx, false, DEFAULT_ACCOUNT_NUM, 0);
    schema::put_next_to_use_addr_pool_idx(tx, true, DEFAULT_ACCOUNT_NUM, 0);
    schema::put_last_account(tx, DEFAULT_ACCOUNT_NUM);

    // Watching-only rows store no wrapped private keys at all.
    let imported_row = new_account_row(Vec::new(), Vec::new(), IMPORTED_ADDR_ACCOUNT_NAME);
    schema::put_account_info(tx, IMPORTED_ADDR_ACCOUNT, &imported_row);
    let default_row = new_account_row(acct_pub_enc, Vec::new(), DEFAULT_ACCOUNT_NAME);
    schema::put_account_info(tx, DEFAULT_ACCOUNT_NUM, &default_row);

    info!(network = params.name, "Created watching-only address manager");
    Ok(())
}

fn encrypt_key_bytes(
    master: &SecretKey,
    key: &CryptoKey,
    what: &str,
) -> WalletResult<Vec<u8>> {
    let bytes = Zeroizing::new(key.bytes());
    master
        .encrypt(bytes.as_slice())
        .map_err(|e| WalletError::crypto(format!("failed to encrypt {what}"), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aero_keychain::MAINNET;
    use tempfile::TempDir;

    const TEST_SEED: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
        0x0e, 0x0f,
    ];

    fn opts() -> ScryptOptions {
        ScryptOptions::for_testing()
    }

    fn new_wallet() -> (Store, Manager, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        Manager::create(&store, &TEST_SEED, b"pub", b"priv", &MAINNET, &opts()).unwrap();
        let manager = Manager::open(&store, b"pub", &MAINNET).unwrap();
        (store, manager, tmp)
    }

    #[test]
    fn test_create_validation() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();

        let err =
            Manager::create(&store, &TEST_SEED, b"pub", b"", &MAINNET, &opts()).unwrap_err();
        assert!(matches!(err, WalletError::EmptyPassphrase));

        Manager::create(&store, &TEST_SEED, b"pub", b"priv", &MAINNET, &opts()).unwrap();
        let err =
            Manager::create(&store, &TEST_SEED, b"pub", b"priv", &MAINNET, &opts()).unwrap_err();
        assert!(matches!(err, WalletError::AlreadyExists));
    }

    #[test]
    fn test_open_wrong_public_passphrase() {
        let (store, _manager, _tmp) = new_wallet();
        let err = Manager::open(&store, b"nope", &MAINNET).unwrap_err();
        assert!(matches!(err, WalletError::WrongPassphrase(_)));
    }

    #[test]
    fn test_unlock_lock_cycle() {
        let (_store, manager, _tmp) = new_wallet();
        assert!(manager.is_locked());

        manager.unlock(b"priv").unwrap();
        assert!(!manager.is_locked());

        // Fast path: already unlocked with the right passphrase.
        manager.unlock(b"priv").unwrap();
        assert!(!manager.is_locked());

        // Wrong passphrase while unlocked locks the manager.
        let err = manager.unlock(b"wrong").unwrap_err();
        assert!(matches!(err, WalletError::WrongPassphrase(_)));
        assert!(manager.is_locked());

        manager.unlock(b"priv").unwrap();
        manager.lock().unwrap();
        assert!(manager.is_locked());
        assert!(matches!(manager.lock().unwrap_err(), WalletError::Locked));
    }

    #[test]
    fn test_new_account() {
        let (store, manager, _tmp) = new_wallet();

        let err = store
            .update(|tx| manager.new_account(tx, "savings"))
            .unwrap_err();
        assert!(matches!(err, WalletError::Locked));

        manager.unlock(b"priv").unwrap();
        let account = store.update(|tx| manager.new_account(tx, "savings")).unwrap();
        assert_eq!(account, 1);

        store
            .view(|tx| {
                assert_eq!(manager.lookup_account(tx, "savings")?, 1);
                assert_eq!(manager.account_name(tx, 1)?, "savings");
                assert_eq!(manager.last_account(tx)?, 1);
                Ok::<_, WalletError>(())
            })
            .unwrap();

        let err = store
            .update(|tx| manager.new_account(tx, "savings"))
            .unwrap_err();
        assert!(matches!(err, WalletError::DuplicateAccount(_)));
        let err = store
            .update(|tx| manager.new_account(tx, IMPORTED_ADDR_ACCOUNT_NAME))
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAccount(_)));
        let err = store.update(|tx| manager.new_account(tx, "")).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAccount(_)));

        // A fresh account reports nothing used.
        let props = store
            .view(|tx| manager.account_properties(tx, account))
            .unwrap();
        assert_eq!(props.last_used_external_index, NO_ADDRESS_INDEX);
        assert_eq!(props.last_returned_external_index, 0);
    }

    #[test]
    fn test_rename_account() {
        let (store, manager, _tmp) = new_wallet();
        manager.unlock(b"priv").unwrap();
        store.update(|tx| manager.new_account(tx, "old")).unwrap();

        store.update(|tx| manager.rename_account(tx, 1, "new")).unwrap();
        store
            .view(|tx| {
                assert_eq!(manager.lookup_account(tx, "new")?, 1);
                assert!(matches!(
                    manager.lookup_account(tx, "old").unwrap_err(),
                    WalletError::NotFound(_)
                ));
                assert_eq!(manager.account_name(tx, 1)?, "new");
                Ok::<_, WalletError>(())
            })
            .unwrap();

        let err = store
            .update(|tx| manager.rename_account(tx, IMPORTED_ADDR_ACCOUNT, "other"))
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAccount(_)));
    }

    #[test]
    fn test_account_branch_xpub() {
        let (store, manager, _tmp) = new_wallet();

        store
            .view(|tx| {
                let xpub = manager.account_xpub(tx, 0)?;
                assert!(!xpub.is_private());

                let branch = manager.account_branch_xpub(tx, 0, EXTERNAL_BRANCH)?;
                assert_eq!(
                    branch.serialize(),
                    xpub.child(EXTERNAL_BRANCH).unwrap().serialize()
                );

                assert!(matches!(
                    manager.account_branch_xpub(tx, 0, 2).unwrap_err(),
                    WalletError::Branch
                ));
                assert!(matches!(
                    manager.account_xpub(tx, IMPORTED_ADDR_ACCOUNT).unwrap_err(),
                    WalletError::InvalidAccount(_)
                ));
                Ok::<_, WalletError>(())
            })
            .unwrap();
    }

    #[test]
    fn test_sync_and_address_lookup() {
        let (store, manager, _tmp) = new_wallet();
        manager.unlock(b"priv").unwrap();

        store
            .update(|tx| manager.sync_account_to_addr_index(tx, 0, EXTERNAL_BRANCH, 5))
            .unwrap();

        let branch_xpub = store
            .view(|tx| manager.account_branch_xpub(tx, 0, EXTERNAL_BRANCH))
            .unwrap();
        let child = branch_xpub.child(3).unwrap();
        let addr = child.address(&MAINNET).unwrap();

        let managed = store.view(|tx| manager.address(tx, &addr)).unwrap();
        match managed {
            ManagedAddress::Chained {
                account,
                branch,
                index,
                ..
            } => {
                assert_eq!(account, 0);
                assert_eq!(branch, EXTERNAL_BRANCH);
                assert_eq!(index, 3);
            }
            other => panic!("expected chained address, got {other:?}"),
        }
        assert_eq!(
            store.view(|tx| manager.addr_account(tx, &addr)).unwrap(),
            0
        );

        // Syncing to a lower index changes nothing and re-syncing is cheap.
        store
            .update(|tx| manager.sync_account_to_addr_index(tx, 0, EXTERNAL_BRANCH, 3))
            .unwrap();
        let mut count = 0;
        store
            .view(|tx| {
                manager.for_each_account_address(tx, 0, |_| {
                    count += 1;
                    Ok(())
                })
            })
            .unwrap();
        assert_eq!(count, 6);

        let err = store
            .update(|tx| {
                manager.sync_account_to_addr_index(tx, 0, EXTERNAL_BRANCH, HARDENED_KEY_START)
            })
            .unwrap_err();
        assert!(matches!(err, WalletError::TooManyAddresses(_)));
        let err = store
            .update(|tx| manager.sync_account_to_addr_index(tx, 0, 2, 1))
            .unwrap_err();
        assert!(matches!(err, WalletError::Branch));
        let err = store
            .update(|tx| {
                manager.sync_account_to_addr_index(tx, MAX_ACCOUNT_NUM + 1, EXTERNAL_BRANCH, 1)
            })
            .unwrap_err();
        assert!(matches!(err, WalletError::AccountNumTooHigh));
    }

    #[test]
    fn test_private_key_for_chained_address() {
        let (store, manager, _tmp) = new_wallet();
        manager.unlock(b"priv").unwrap();

        store
            .update(|tx| manager.sync_account_to_addr_index(tx, 0, INTERNAL_BRANCH, 1))
            .unwrap();
        let branch_xpub = store
            .view(|tx| manager.account_branch_xpub(tx, 0, INTERNAL_BRANCH))
            .unwrap();
        let addr = branch_xpub.child(1).unwrap().address(&MAINNET).unwrap();

        store
            .view(|tx| {
                let guard = manager.private_key(tx, &addr)?;
                let secp = secp256k1::Secp256k1::new();
                let derived_pub = PublicKey::from_secret_key(&secp, guard.key());
                assert_eq!(
                    aero_keychain::hash160(&derived_pub.serialize()),
                    addr.hash160()
                );
                Ok::<_, WalletError>(())
            })
            .unwrap();

        // The key was registered and can be locked away again.
        manager.lock().unwrap();
        let err = store.view(|tx| manager.private_key(tx, &addr)).unwrap_err();
        assert!(matches!(err, WalletError::Locked));
    }

    #[test]
    fn test_import_and_scripts() {
        let (store, manager, _tmp) = new_wallet();
        manager.unlock(b"priv").unwrap();

        let wif = Wif::decode("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn").unwrap();
        let managed = store.update(|tx| manager.import_private_key(tx, &wif)).unwrap();
        assert!(managed.imported());
        assert_eq!(managed.account(), IMPORTED_ADDR_ACCOUNT);

        let err = store
            .update(|tx| manager.import_private_key(tx, &wif))
            .unwrap_err();
        assert!(matches!(err, WalletError::DuplicateAddress(_)));

        store
            .view(|tx| {
                let guard = manager.private_key(tx, managed.address())?;
                assert_eq!(guard.key(), wif.priv_key());
                Ok::<_, WalletError>(())
            })
            .unwrap();

        let script = b"\x51\x21\x02abcdefghijklmnopqrstuvwxyz01234\x51\xae".to_vec();
        let script_addr = store
            .update(|tx| manager.import_script(tx, &script))
            .unwrap();
        store
            .view(|tx| {
                let redeem = manager.redeem_script(tx, script_addr.address())?;
                assert_eq!(&*redeem, script.as_slice());

                // Dispatch errors for the wrong address kinds.
                assert!(matches!(
                    manager.private_key(tx, script_addr.address()).unwrap_err(),
                    WalletError::Input(_)
                ));
                assert!(matches!(
                    manager.redeem_script(tx, managed.address()).unwrap_err(),
                    WalletError::Input(_)
                ));
                Ok::<_, WalletError>(())
            })
            .unwrap();

        let props = store
            .view(|tx| manager.account_properties(tx, IMPORTED_ADDR_ACCOUNT))
            .unwrap();
        assert_eq!(props.imported_key_count, 2);
        assert_eq!(props.account_name, IMPORTED_ADDR_ACCOUNT_NAME);
    }

    #[test]
    fn test_mark_used_and_returned_monotone() {
        let (store, manager, _tmp) = new_wallet();
        manager.unlock(b"priv").unwrap();

        store
            .update(|tx| manager.mark_used_child_index(tx, 0, EXTERNAL_BRANCH, 5))
            .unwrap();
        let props = store.view(|tx| manager.account_properties(tx, 0)).unwrap();
        assert_eq!(props.last_used_external_index, 5);
        assert_eq!(props.last_returned_external_index, 5);
        assert_eq!(props.last_used_internal_index, NO_ADDRESS_INDEX);

        // Lower indexes are no-ops.
        store
            .update(|tx| manager.mark_used_child_index(tx, 0, EXTERNAL_BRANCH, 3))
            .unwrap();
        let props = store.view(|tx| manager.account_properties(tx, 0)).unwrap();
        assert_eq!(props.last_used_external_index, 5);

        store
            .update(|tx| manager.mark_returned_child_index(tx, 0, EXTERNAL_BRANCH, 9))
            .unwrap();
        let props = store.view(|tx| manager.account_properties(tx, 0)).unwrap();
        assert_eq!(props.last_returned_external_index, 9);

        store
            .update(|tx| manager.mark_returned_child_index(tx, 0, EXTERNAL_BRANCH, 2))
            .unwrap();
        let props = store.view(|tx| manager.account_properties(tx, 0)).unwrap();
        assert_eq!(props.last_returned_external_index, 9);

        assert!(matches!(
            store
                .update(|tx| manager.mark_used_child_index(tx, 0, 7, 1))
                .unwrap_err(),
            WalletError::Branch
        ));

        // Marking a non-chained address used is a silent no-op.
        let wif = Wif::decode("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn").unwrap();
        let managed = store.update(|tx| manager.import_private_key(tx, &wif)).unwrap();
        store
            .update(|tx| manager.mark_used(tx, managed.address()))
            .unwrap();
    }

    #[test]
    fn test_encrypt_decrypt_kinds() {
        let (_store, manager, _tmp) = new_wallet();

        // Public data stays reachable while locked.
        let ciphertext = manager.encrypt(CryptoKeyKind::Public, b"data").unwrap();
        assert_eq!(manager.decrypt(CryptoKeyKind::Public, &ciphertext).unwrap(), b"data");

        assert!(matches!(
            manager.encrypt(CryptoKeyKind::Private, b"data").unwrap_err(),
            WalletError::Locked
        ));

        manager.unlock(b"priv").unwrap();
        let ciphertext = manager.encrypt(CryptoKeyKind::Script, b"data").unwrap();
        assert_eq!(manager.decrypt(CryptoKeyKind::Script, &ciphertext).unwrap(), b"data");

        let mut tampered = manager.encrypt(CryptoKeyKind::Private, b"data").unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(
            manager.decrypt(CryptoKeyKind::Private, &tampered).unwrap_err(),
            WalletError::Crypto { .. }
        ));
    }

    #[test]
    fn test_change_passphrase() {
        let (store, manager, _tmp) = new_wallet();

        let err = store
            .update(|tx| manager.change_passphrase(tx, b"wrong", b"priv2", true, &opts()))
            .unwrap_err();
        assert!(matches!(err, WalletError::WrongPassphrase(_)));

        store
            .update(|tx| manager.change_passphrase(tx, b"priv", b"priv2", true, &opts()))
            .unwrap();
        assert!(matches!(
            manager.unlock(b"priv").unwrap_err(),
            WalletError::WrongPassphrase(_)
        ));
        manager.unlock(b"priv2").unwrap();
        manager.lock().unwrap();

        // The new parameters persist across a reopen.
        manager.close();
        let reopened = Manager::open(&store, b"pub", &MAINNET).unwrap();
        reopened.unlock(b"priv2").unwrap();

        // Public passphrase change.
        store
            .update(|tx| reopened.change_passphrase(tx, b"pub", b"pub2", false, &opts()))
            .unwrap();
        reopened.close();
        assert!(matches!(
            Manager::open(&store, b"pub", &MAINNET).unwrap_err(),
            WalletError::WrongPassphrase(_)
        ));
        Manager::open(&store, b"pub2", &MAINNET).unwrap();
    }

    #[test]
    fn test_convert_to_watching_only() {
        let (store, manager, _tmp) = new_wallet();
        manager.unlock(b"priv").unwrap();

        let wif = Wif::decode("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn").unwrap();
        let imported = store.update(|tx| manager.import_private_key(tx, &wif)).unwrap();
        store
            .update(|tx| manager.sync_account_to_addr_index(tx, 0, EXTERNAL_BRANCH, 2))
            .unwrap();

        store
            .update(|tx| manager.convert_to_watching_only(tx))
            .unwrap();
        assert!(manager.watching_only());

        assert!(matches!(
            manager.unlock(b"priv").unwrap_err(),
            WalletError::WatchingOnly
        ));
        assert!(matches!(manager.lock().unwrap_err(), WalletError::WatchingOnly));
        let err = store
            .view(|tx| manager.private_key(tx, imported.address()))
            .unwrap_err();
        assert!(matches!(err, WalletError::WatchingOnly));

        // Public lookups still work.
        let managed = store
            .view(|tx| manager.address(tx, imported.address()))
            .unwrap();
        assert_eq!(managed.account(), IMPORTED_ADDR_ACCOUNT);

        // Converting again has no effect.
        store
            .update(|tx| manager.convert_to_watching_only(tx))
            .unwrap();

        // The flag survives a reopen and the private tier is gone on disk.
        manager.close();
        let reopened = Manager::open(&store, b"pub", &MAINNET).unwrap();
        assert!(reopened.watching_only());
        let err = store.view(|tx| reopened.coin_type_privkey(tx)).unwrap_err();
        assert!(matches!(err, WalletError::WatchingOnly));
    }

    #[test]
    fn test_close_rejects_operations() {
        let (store, manager, _tmp) = new_wallet();
        manager.close();

        assert!(matches!(manager.unlock(b"priv").unwrap_err(), WalletError::Input(_)));
        assert!(matches!(
            store.view(|tx| manager.last_account(tx)).unwrap_err(),
            WalletError::Input(_)
        ));
        assert!(matches!(
            manager.encrypt(CryptoKeyKind::Public, b"x").unwrap_err(),
            WalletError::Input(_)
        ));

        // Closing twice is harmless.
        manager.close();
    }

    #[test]
    fn test_coin_type_privkey_requires_unlock() {
        let (store, manager, _tmp) = new_wallet();
        assert!(matches!(
            store.view(|tx| manager.coin_type_privkey(tx)).unwrap_err(),
            WalletError::Locked
        ));

        manager.unlock(b"priv").unwrap();
        let mut key = store.view(|tx| manager.coin_type_privkey(tx)).unwrap();
        assert!(key.is_private());
        key.zero();
    }

    #[test]
    fn test_master_pubkey_reports_requested_account() {
        let (store, manager, _tmp) = new_wallet();

        let encoded = store.view(|tx| manager.master_pubkey(tx, 0)).unwrap();
        let parsed = ExtendedKey::parse(&encoded, &MAINNET).unwrap();
        assert!(!parsed.is_private());

        let err = store.view(|tx| manager.master_pubkey(tx, 42)).unwrap_err();
        assert!(matches!(err, WalletError::NotFound(msg) if msg.contains("42")));
    }

    #[test]
    fn test_watch_only_creation() {
        let (store, manager, _tmp) = new_wallet();
        let xpub = store.view(|tx| manager.master_pubkey(tx, 0)).unwrap();
        manager.close();

        let tmp2 = TempDir::new().unwrap();
        let store2 = Store::open(tmp2.path()).unwrap();
        Manager::create_watch_only(&store2, &xpub, b"pub", &MAINNET, &opts()).unwrap();

        let watcher = Manager::open(&store2, b"pub", &MAINNET).unwrap();
        assert!(watcher.watching_only());

        // The watching manager derives the same chained addresses.
        store2
            .update(|tx| watcher.sync_account_to_addr_index(tx, 0, EXTERNAL_BRANCH, 3))
            .unwrap();
        let watcher_branch = store2
            .view(|tx| watcher.account_branch_xpub(tx, 0, EXTERNAL_BRANCH))
            .unwrap();
        let full_store_branch = {
            let manager = Manager::open(&store, b"pub", &MAINNET).unwrap();
            store
                .view(|tx| manager.account_branch_xpub(tx, 0, EXTERNAL_BRANCH))
                .unwrap()
        };
        assert_eq!(watcher_branch.serialize(), full_store_branch.serialize());

        // Importing into a watching-only manager keeps only the public key.
        let wif = Wif::decode("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn").unwrap();
        let imported = store2.update(|tx| watcher.import_private_key(tx, &wif)).unwrap();
        assert!(matches!(
            store2
                .view(|tx| watcher.private_key(tx, imported.address()))
                .unwrap_err(),
            WalletError::WatchingOnly
        ));
    }
}
