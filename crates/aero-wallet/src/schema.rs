//! Typed rows over the store buckets.
//!
//! Row payloads use little-endian integers and `u32` length-prefixed byte
//! strings.  Bucket keys that participate in iteration order (`accounts`,
//! `account_id_idx`, `next_to_use_pool`) encode numbers big-endian so the
//! store's key order matches numeric order.

use aero_keychain::HASH160_SIZE;
use aero_store::{Bucket, ReadView, WriteTxn};

use crate::{WalletError, WalletResult, DB_VERSION};

const KEY_PUB: &[u8] = b"pub";
const KEY_PRIV: &[u8] = b"priv";
const KEY_SCRIPT: &[u8] = b"script";
const SINGLETON_KEY: &[u8] = b"value";

const ADDR_KIND_CHAIN: u8 = 0;
const ADDR_KIND_IMPORTED: u8 = 1;
const ADDR_KIND_SCRIPT: u8 = 2;

/// A persisted account row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AccountRow {
    pub(crate) pub_key_enc: Vec<u8>,
    pub(crate) priv_key_enc: Vec<u8>,
    pub(crate) last_used_external_index: u32,
    pub(crate) last_used_internal_index: u32,
    pub(crate) last_returned_external_index: u32,
    pub(crate) last_returned_internal_index: u32,
    pub(crate) name: String,
}

/// A chained address derived from an account's extended public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChainedAddressRow {
    pub(crate) account: u32,
    pub(crate) branch: u32,
    pub(crate) index: u32,
}

/// An imported private/public key pair.  The private half is empty on
/// watching-only managers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportedKeyRow {
    pub(crate) account: u32,
    pub(crate) enc_pubkey: Vec<u8>,
    pub(crate) enc_privkey: Vec<u8>,
}

/// An imported pay-to-script-hash script.  The script itself is empty on
/// watching-only managers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportedScriptRow {
    pub(crate) account: u32,
    pub(crate) enc_hash: Vec<u8>,
    pub(crate) enc_script: Vec<u8>,
}

/// The three address row variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AddressRow {
    Chained(ChainedAddressRow),
    ImportedKey(ImportedKeyRow),
    ImportedScript(ImportedScriptRow),
}

impl AddressRow {
    pub(crate) fn account(&self) -> u32 {
        match self {
            AddressRow::Chained(row) => row.account,
            AddressRow::ImportedKey(row) => row.account,
            AddressRow::ImportedScript(row) => row.account,
        }
    }
}

// -- encoding helpers --------------------------------------------------------

struct RowReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RowReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> WalletResult<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(WalletError::Data("row is truncated".into()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> WalletResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> WalletResult<u32> {
        let raw = self.take(4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(raw);
        Ok(u32::from_le_bytes(buf))
    }

    fn bytes(&mut self) -> WalletResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> WalletResult<String> {
        String::from_utf8(self.bytes()?)
            .map_err(|_| WalletError::Data("row string is not valid utf-8".into()))
    }

    fn finish(self) -> WalletResult<()> {
        if self.pos != self.buf.len() {
            return Err(WalletError::Data("row has trailing bytes".into()));
        }
        Ok(())
    }
}

fn push_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

fn decode_u32(raw: &[u8], what: &str) -> WalletResult<u32> {
    if raw.len() != 4 {
        return Err(WalletError::Data(format!("malformed {what} row")));
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(raw);
    Ok(u32::from_le_bytes(buf))
}

fn decode_hash(raw: &[u8]) -> WalletResult<[u8; HASH160_SIZE]> {
    if raw.len() != HASH160_SIZE {
        return Err(WalletError::Data("malformed address hash key".into()));
    }
    let mut hash = [0u8; HASH160_SIZE];
    hash.copy_from_slice(raw);
    Ok(hash)
}

fn fetch_u32<V: ReadView>(view: &V, bucket: Bucket, key: &[u8], what: &str) -> WalletResult<u32> {
    let raw = view
        .get(bucket, key)?
        .ok_or_else(|| WalletError::NotFound(format!("{what} not found")))?;
    decode_u32(&raw, what)
}

// -- namespace ---------------------------------------------------------------

/// Whether the manager has been created in this store.
pub(crate) fn manager_exists<V: ReadView>(view: &V) -> WalletResult<bool> {
    Ok(view.contains(Bucket::MasterKeyParams, KEY_PUB)?)
}

/// Initial namespace setup.
pub(crate) fn create_manager_ns(tx: &WriteTxn<'_>) {
    tx.put(Bucket::DbVersion, SINGLETON_KEY, DB_VERSION.to_le_bytes());
}

pub(crate) fn fetch_db_version<V: ReadView>(view: &V) -> WalletResult<u32> {
    fetch_u32(view, Bucket::DbVersion, SINGLETON_KEY, "database version")
}

// -- master and crypto keys --------------------------------------------------

pub(crate) fn put_master_key_params(
    tx: &WriteTxn<'_>,
    pub_params: Option<&[u8]>,
    priv_params: Option<&[u8]>,
) {
    if let Some(params) = pub_params {
        tx.put(Bucket::MasterKeyParams, KEY_PUB, params);
    }
    if let Some(params) = priv_params {
        tx.put(Bucket::MasterKeyParams, KEY_PRIV, params);
    }
}

/// Fetch the marshalled master key parameters.  The private parameters are
/// absent after a watching-only conversion.
pub(crate) fn fetch_master_key_params<V: ReadView>(
    view: &V,
) -> WalletResult<(Vec<u8>, Option<Vec<u8>>)> {
    let pub_params = view
        .get(Bucket::MasterKeyParams, KEY_PUB)?
        .ok_or_else(|| WalletError::NotFound("master public key parameters not found".into()))?;
    let priv_params = view.get(Bucket::MasterKeyParams, KEY_PRIV)?;
    Ok((pub_params, priv_params))
}

pub(crate) fn put_crypto_keys(
    tx: &WriteTxn<'_>,
    pub_enc: Option<&[u8]>,
    priv_enc: Option<&[u8]>,
    script_enc: Option<&[u8]>,
) {
    if let Some(enc) = pub_enc {
        tx.put(Bucket::CryptoKeys, KEY_PUB, enc);
    }
    if let Some(enc) = priv_enc {
        tx.put(Bucket::CryptoKeys, KEY_PRIV, enc);
    }
    if let Some(enc) = script_enc {
        tx.put(Bucket::CryptoKeys, KEY_SCRIPT, enc);
    }
}

/// Fetch the wrapped crypto keys.  The private and script keys are absent
/// after a watching-only conversion.
pub(crate) fn fetch_crypto_keys<V: ReadView>(
    view: &V,
) -> WalletResult<(Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>)> {
    let pub_enc = view
        .get(Bucket::CryptoKeys, KEY_PUB)?
        .ok_or_else(|| WalletError::NotFound("crypto public key not found".into()))?;
    let priv_enc = view.get(Bucket::CryptoKeys, KEY_PRIV)?;
    let script_enc = view.get(Bucket::CryptoKeys, KEY_SCRIPT)?;
    Ok((pub_enc, priv_enc, script_enc))
}

pub(crate) fn put_coin_type_keys(tx: &WriteTxn<'_>, pub_enc: &[u8], priv_enc: &[u8]) {
    tx.put(Bucket::CoinTypeKeys, KEY_PUB, pub_enc);
    tx.put(Bucket::CoinTypeKeys, KEY_PRIV, priv_enc);
}

/// Fetch the wrapped coin-type keys.  The private key is absent on
/// watching-only managers.
pub(crate) fn fetch_coin_type_keys<V: ReadView>(
    view: &V,
) -> WalletResult<(Vec<u8>, Option<Vec<u8>>)> {
    let pub_enc = view
        .get(Bucket::CoinTypeKeys, KEY_PUB)?
        .ok_or_else(|| WalletError::NotFound("coin type public key not found".into()))?;
    let priv_enc = view.get(Bucket::CoinTypeKeys, KEY_PRIV)?;
    Ok((pub_enc, priv_enc))
}

pub(crate) fn put_watching_only(tx: &WriteTxn<'_>, watching_only: bool) {
    tx.put(
        Bucket::WatchingOnly,
        SINGLETON_KEY,
        [u8::from(watching_only)],
    );
}

pub(crate) fn fetch_watching_only<V: ReadView>(view: &V) -> WalletResult<bool> {
    let raw = view
        .get(Bucket::WatchingOnly, SINGLETON_KEY)?
        .ok_or_else(|| WalletError::NotFound("watching-only flag not found".into()))?;
    match raw.as_slice() {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(WalletError::Data("malformed watching-only row".into())),
    }
}

// -- accounts ----------------------------------------------------------------

fn serialize_account_row(row: &AccountRow) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        8 + row.pub_key_enc.len() + row.priv_key_enc.len() + 16 + 4 + row.name.len(),
    );
    push_bytes(&mut out, &row.pub_key_enc);
    push_bytes(&mut out, &row.priv_key_enc);
    out.extend_from_slice(&row.last_used_external_index.to_le_bytes());
    out.extend_from_slice(&row.last_used_internal_index.to_le_bytes());
    out.extend_from_slice(&row.last_returned_external_index.to_le_bytes());
    out.extend_from_slice(&row.last_returned_internal_index.to_le_bytes());
    push_bytes(&mut out, row.name.as_bytes());
    out
}

fn deserialize_account_row(raw: &[u8]) -> WalletResult<AccountRow> {
    let mut reader = RowReader::new(raw);
    let row = AccountRow {
        pub_key_enc: reader.bytes()?,
        priv_key_enc: reader.bytes()?,
        last_used_external_index: reader.u32()?,
        last_used_internal_index: reader.u32()?,
        last_returned_external_index: reader.u32()?,
        last_returned_internal_index: reader.u32()?,
        name: reader.string()?,
    };
    reader.finish()?;
    Ok(row)
}

/// Write an account row without touching the name indexes.
pub(crate) fn put_account_row(tx: &WriteTxn<'_>, account: u32, row: &AccountRow) {
    tx.put(
        Bucket::Accounts,
        account.to_be_bytes(),
        serialize_account_row(row),
    );
}

/// Write an account row along with both name indexes.
pub(crate) fn put_account_info(tx: &WriteTxn<'_>, account: u32, row: &AccountRow) {
    put_account_row(tx, account, row);
    tx.put(
        Bucket::AccountNameIndex,
        row.name.as_bytes(),
        account.to_le_bytes(),
    );
    tx.put(
        Bucket::AccountIdIndex,
        account.to_be_bytes(),
        row.name.as_bytes(),
    );
}

pub(crate) fn fetch_account_info<V: ReadView>(view: &V, account: u32) -> WalletResult<AccountRow> {
    let raw = view
        .get(Bucket::Accounts, &account.to_be_bytes())?
        .ok_or_else(|| WalletError::NotFound(format!("account {account} not found")))?;
    deserialize_account_row(&raw)
}

pub(crate) fn fetch_account_by_name<V: ReadView>(view: &V, name: &str) -> WalletResult<u32> {
    let raw = view
        .get(Bucket::AccountNameIndex, name.as_bytes())?
        .ok_or_else(|| WalletError::NotFound(format!("account '{name}' not found")))?;
    decode_u32(&raw, "account name index")
}

pub(crate) fn fetch_account_name<V: ReadView>(view: &V, account: u32) -> WalletResult<String> {
    let raw = view
        .get(Bucket::AccountIdIndex, &account.to_be_bytes())?
        .ok_or_else(|| WalletError::NotFound(format!("account {account} not found")))?;
    String::from_utf8(raw).map_err(|_| WalletError::Data("account name is not valid utf-8".into()))
}

pub(crate) fn delete_account_name_index(tx: &WriteTxn<'_>, name: &str) {
    tx.delete(Bucket::AccountNameIndex, name.as_bytes());
}

pub(crate) fn delete_account_id_index(tx: &WriteTxn<'_>, account: u32) {
    tx.delete(Bucket::AccountIdIndex, account.to_be_bytes());
}

/// All account numbers, ascending, from the id index.
pub(crate) fn accounts<V: ReadView>(view: &V) -> WalletResult<Vec<u32>> {
    let mut out = Vec::new();
    for (key, _) in view.pairs(Bucket::AccountIdIndex)? {
        if key.len() != 4 {
            return Err(WalletError::Data("malformed account id index key".into()));
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&key);
        out.push(u32::from_be_bytes(buf));
    }
    Ok(out)
}

pub(crate) fn put_last_account(tx: &WriteTxn<'_>, account: u32) {
    tx.put(Bucket::LastAccount, SINGLETON_KEY, account.to_le_bytes());
}

pub(crate) fn fetch_last_account<V: ReadView>(view: &V) -> WalletResult<u32> {
    fetch_u32(view, Bucket::LastAccount, SINGLETON_KEY, "last account")
}

// -- addresses ---------------------------------------------------------------

fn serialize_address_row(row: &AddressRow) -> Vec<u8> {
    let mut out = Vec::new();
    match row {
        AddressRow::Chained(row) => {
            out.push(ADDR_KIND_CHAIN);
            out.extend_from_slice(&row.account.to_le_bytes());
            out.extend_from_slice(&row.branch.to_le_bytes());
            out.extend_from_slice(&row.index.to_le_bytes());
        }
        AddressRow::ImportedKey(row) => {
            out.push(ADDR_KIND_IMPORTED);
            out.extend_from_slice(&row.account.to_le_bytes());
            push_bytes(&mut out, &row.enc_pubkey);
            push_bytes(&mut out, &row.enc_privkey);
        }
        AddressRow::ImportedScript(row) => {
            out.push(ADDR_KIND_SCRIPT);
            out.extend_from_slice(&row.account.to_le_bytes());
            push_bytes(&mut out, &row.enc_hash);
            push_bytes(&mut out, &row.enc_script);
        }
    }
    out
}

fn deserialize_address_row(raw: &[u8]) -> WalletResult<AddressRow> {
    let mut reader = RowReader::new(raw);
    let kind = reader.u8()?;
    let account = reader.u32()?;
    let row = match kind {
        ADDR_KIND_CHAIN => AddressRow::Chained(ChainedAddressRow {
            account,
            branch: reader.u32()?,
            index: reader.u32()?,
        }),
        ADDR_KIND_IMPORTED => AddressRow::ImportedKey(ImportedKeyRow {
            account,
            enc_pubkey: reader.bytes()?,
            enc_privkey: reader.bytes()?,
        }),
        ADDR_KIND_SCRIPT => AddressRow::ImportedScript(ImportedScriptRow {
            account,
            enc_hash: reader.bytes()?,
            enc_script: reader.bytes()?,
        }),
        other => {
            return Err(WalletError::Data(format!(
                "unsupported address row kind {other}"
            )))
        }
    };
    reader.finish()?;
    Ok(row)
}

fn put_address_row(tx: &WriteTxn<'_>, hash: &[u8; HASH160_SIZE], row: &AddressRow) {
    tx.put(Bucket::Addresses, hash.as_slice(), serialize_address_row(row));
    tx.put(
        Bucket::AddrAccountIndex,
        hash.as_slice(),
        row.account().to_le_bytes(),
    );
}

pub(crate) fn put_chained_address(
    tx: &WriteTxn<'_>,
    hash: &[u8; HASH160_SIZE],
    account: u32,
    branch: u32,
    index: u32,
) {
    put_address_row(
        tx,
        hash,
        &AddressRow::Chained(ChainedAddressRow {
            account,
            branch,
            index,
        }),
    );
}

pub(crate) fn put_imported_address(
    tx: &WriteTxn<'_>,
    hash: &[u8; HASH160_SIZE],
    account: u32,
    enc_pubkey: Vec<u8>,
    enc_privkey: Vec<u8>,
) {
    put_address_row(
        tx,
        hash,
        &AddressRow::ImportedKey(ImportedKeyRow {
            account,
            enc_pubkey,
            enc_privkey,
        }),
    );
}

pub(crate) fn put_script_address(
    tx: &WriteTxn<'_>,
    hash: &[u8; HASH160_SIZE],
    account: u32,
    enc_hash: Vec<u8>,
    enc_script: Vec<u8>,
) {
    put_address_row(
        tx,
        hash,
        &AddressRow::ImportedScript(ImportedScriptRow {
            account,
            enc_hash,
            enc_script,
        }),
    );
}

pub(crate) fn fetch_address<V: ReadView>(
    view: &V,
    hash: &[u8; HASH160_SIZE],
) -> WalletResult<AddressRow> {
    let raw = view
        .get(Bucket::Addresses, hash)?
        .ok_or_else(|| WalletError::NotFound("address not found".into()))?;
    deserialize_address_row(&raw)
}

pub(crate) fn exists_address<V: ReadView>(
    view: &V,
    hash: &[u8; HASH160_SIZE],
) -> WalletResult<bool> {
    Ok(view.contains(Bucket::Addresses, hash)?)
}

pub(crate) fn fetch_addr_account<V: ReadView>(
    view: &V,
    hash: &[u8; HASH160_SIZE],
) -> WalletResult<u32> {
    fetch_u32(view, Bucket::AddrAccountIndex, hash, "address account index")
}

/// All address rows belonging to an account.
pub(crate) fn account_address_rows<V: ReadView>(
    view: &V,
    account: u32,
) -> WalletResult<Vec<([u8; HASH160_SIZE], AddressRow)>> {
    let mut out = Vec::new();
    for (key, value) in view.pairs(Bucket::Addresses)? {
        let row = deserialize_address_row(&value)?;
        if row.account() == account {
            out.push((decode_hash(&key)?, row));
        }
    }
    Ok(out)
}

/// All address rows in the manager.
pub(crate) fn all_address_rows<V: ReadView>(
    view: &V,
) -> WalletResult<Vec<([u8; HASH160_SIZE], AddressRow)>> {
    let mut out = Vec::new();
    for (key, value) in view.pairs(Bucket::Addresses)? {
        out.push((decode_hash(&key)?, deserialize_address_row(&value)?));
    }
    Ok(out)
}

// -- next-to-use pool --------------------------------------------------------

fn pool_key(internal: bool, account: u32) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = u8::from(internal);
    key[1..].copy_from_slice(&account.to_be_bytes());
    key
}

pub(crate) fn put_next_to_use_addr_pool_idx(
    tx: &WriteTxn<'_>,
    internal: bool,
    account: u32,
    index: u32,
) {
    tx.put(
        Bucket::NextToUsePool,
        pool_key(internal, account),
        index.to_le_bytes(),
    );
}

pub(crate) fn fetch_next_to_use_addr_pool_idx<V: ReadView>(
    view: &V,
    internal: bool,
    account: u32,
) -> WalletResult<u32> {
    fetch_u32(
        view,
        Bucket::NextToUsePool,
        &pool_key(internal, account),
        "next-to-use pool index",
    )
}

// -- watching-only conversion ------------------------------------------------

/// Remove every private-tier ciphertext from the store: master private key
/// parameters, wrapped private/script crypto keys, the coin-type private key,
/// account private keys, imported private keys, and imported scripts.
pub(crate) fn delete_private_keys(tx: &WriteTxn<'_>) -> WalletResult<()> {
    tx.delete(Bucket::MasterKeyParams, KEY_PRIV);
    tx.delete(Bucket::CryptoKeys, KEY_PRIV);
    tx.delete(Bucket::CryptoKeys, KEY_SCRIPT);
    tx.delete(Bucket::CoinTypeKeys, KEY_PRIV);

    for (key, value) in tx.pairs(Bucket::Accounts)? {
        let mut row = deserialize_account_row(&value)?;
        if !row.priv_key_enc.is_empty() {
            row.priv_key_enc = Vec::new();
            tx.put(Bucket::Accounts, key, serialize_account_row(&row));
        }
    }

    for (key, value) in tx.pairs(Bucket::Addresses)? {
        match deserialize_address_row(&value)? {
            AddressRow::ImportedKey(mut row) if !row.enc_privkey.is_empty() => {
                row.enc_privkey = Vec::new();
                tx.put(
                    Bucket::Addresses,
                    key,
                    serialize_address_row(&AddressRow::ImportedKey(row)),
                );
            }
            AddressRow::ImportedScript(mut row) if !row.enc_script.is_empty() => {
                row.enc_script = Vec::new();
                tx.put(
                    Bucket::Addresses,
                    key,
                    serialize_address_row(&AddressRow::ImportedScript(row)),
                );
            }
            _ => {}
        }
    }
    Ok(())
}
