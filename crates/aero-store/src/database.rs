//! RocksDB database wrapper.

use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options};
use std::path::Path;
use tracing::{debug, info};

use crate::{StoreError, StoreResult};

/// The fixed buckets of the wallet schema, one column family each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    /// Marshalled master key parameters (public and private).
    MasterKeyParams,
    /// Wrapped crypto keys (public, private, script).
    CryptoKeys,
    /// Wrapped BIP0044 coin-type extended keys.
    CoinTypeKeys,
    /// Watching-only flag.
    WatchingOnly,
    /// Account number -> account row.
    Accounts,
    /// Account name -> account number.
    AccountNameIndex,
    /// Account number -> account name.
    AccountIdIndex,
    /// 20-byte address hash -> address row.
    Addresses,
    /// 20-byte address hash -> owning account number.
    AddrAccountIndex,
    /// (branch, account) -> next-to-use pool index.
    NextToUsePool,
    /// Highest created account number.
    LastAccount,
    /// Schema version.
    DbVersion,
    /// Default column family (required by RocksDB).
    Default,
}

impl Bucket {
    /// The column-family name of this bucket.
    pub fn name(&self) -> &'static str {
        match self {
            Bucket::MasterKeyParams => "master_key_params",
            Bucket::CryptoKeys => "crypto_keys",
            Bucket::CoinTypeKeys => "coin_type_keys",
            Bucket::WatchingOnly => "watching_only",
            Bucket::Accounts => "accounts",
            Bucket::AccountNameIndex => "account_name_idx",
            Bucket::AccountIdIndex => "account_id_idx",
            Bucket::Addresses => "addresses",
            Bucket::AddrAccountIndex => "addr_account_idx",
            Bucket::NextToUsePool => "next_to_use_pool",
            Bucket::LastAccount => "last_account",
            Bucket::DbVersion => "db_version",
            Bucket::Default => "default",
        }
    }

    /// All buckets.
    pub fn all() -> &'static [Bucket] {
        &[
            Bucket::MasterKeyParams,
            Bucket::CryptoKeys,
            Bucket::CoinTypeKeys,
            Bucket::WatchingOnly,
            Bucket::Accounts,
            Bucket::AccountNameIndex,
            Bucket::AccountIdIndex,
            Bucket::Addresses,
            Bucket::AddrAccountIndex,
            Bucket::NextToUsePool,
            Bucket::LastAccount,
            Bucket::DbVersion,
            Bucket::Default,
        ]
    }
}

/// A staged batch of writes committed atomically.
#[derive(Debug, Default)]
pub(crate) struct StagedBatch {
    pub(crate) ops: Vec<(Bucket, Vec<u8>, Option<Vec<u8>>)>,
}

/// RocksDB database wrapper with one column family per bucket.
pub struct Database {
    db: DBWithThreadMode<MultiThreaded>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        info!("Opening wallet database at {:?}", path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(64);
        opts.set_keep_log_file_num(1);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Bucket::all()
            .iter()
            .map(|bucket| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(bucket.name(), cf_opts)
            })
            .collect();

        let db =
            DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&opts, path, cf_descriptors)?;

        debug!("Wallet database opened");
        Ok(Self { db })
    }

    /// Get a value by key from a bucket.
    pub fn get(&self, bucket: Bucket, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let handle = self
            .db
            .cf_handle(bucket.name())
            .ok_or_else(|| StoreError::BucketNotFound(bucket.name().to_string()))?;
        Ok(self.db.get_cf(&handle, key)?)
    }

    /// Collect all key/value pairs of a bucket in key order.
    pub fn pairs(&self, bucket: Bucket) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = self
            .db
            .cf_handle(bucket.name())
            .ok_or_else(|| StoreError::BucketNotFound(bucket.name().to_string()))?;

        let mut out = Vec::new();
        for item in self.db.iterator_cf(&handle, rocksdb::IteratorMode::Start) {
            let (key, value) = item?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// Commit a staged batch of writes atomically.
    pub(crate) fn commit(&self, batch: StagedBatch) -> StoreResult<()> {
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for (bucket, key, value) in batch.ops {
            let handle = self
                .db
                .cf_handle(bucket.name())
                .ok_or_else(|| StoreError::BucketNotFound(bucket.name().to_string()))?;
            match value {
                Some(value) => rocks_batch.put_cf(&handle, &key, &value),
                None => rocks_batch.delete_cf(&handle, &key),
            }
        }
        self.db.write(rocks_batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_get_commit() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        assert_eq!(db.get(Bucket::Accounts, b"k").unwrap(), None);

        let batch = StagedBatch {
            ops: vec![
                (Bucket::Accounts, b"k".to_vec(), Some(b"v".to_vec())),
                (Bucket::Addresses, b"a".to_vec(), Some(b"row".to_vec())),
            ],
        };
        db.commit(batch).unwrap();

        assert_eq!(db.get(Bucket::Accounts, b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(
            db.get(Bucket::Addresses, b"a").unwrap(),
            Some(b"row".to_vec())
        );

        let delete = StagedBatch {
            ops: vec![(Bucket::Accounts, b"k".to_vec(), None)],
        };
        db.commit(delete).unwrap();
        assert_eq!(db.get(Bucket::Accounts, b"k").unwrap(), None);
    }

    #[test]
    fn test_pairs_in_key_order() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        let batch = StagedBatch {
            ops: vec![
                (Bucket::AccountIdIndex, vec![0, 0, 0, 2], Some(b"b".to_vec())),
                (Bucket::AccountIdIndex, vec![0, 0, 0, 1], Some(b"a".to_vec())),
            ],
        };
        db.commit(batch).unwrap();

        let pairs = db.pairs(Bucket::AccountIdIndex).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, vec![0, 0, 0, 1]);
        assert_eq!(pairs[1].0, vec![0, 0, 0, 2]);
    }
}
