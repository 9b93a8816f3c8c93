//! Transactional views over the database.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use crate::database::StagedBatch;
use crate::{Bucket, Database, StoreError, StoreResult};

/// Read access shared by read-only and read/write transactions.
pub trait ReadView {
    /// Get a value by key from a bucket.
    fn get(&self, bucket: Bucket, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Whether a key exists in a bucket.
    fn contains(&self, bucket: Bucket, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(bucket, key)?.is_some())
    }

    /// Collect all key/value pairs of a bucket in key order.
    fn pairs(&self, bucket: Bucket) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// A read-only transaction.
pub struct ReadTxn<'s> {
    db: &'s Database,
}

impl ReadView for ReadTxn<'_> {
    fn get(&self, bucket: Bucket, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.db.get(bucket, key)
    }

    fn pairs(&self, bucket: Bucket) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db.pairs(bucket)
    }
}

/// A read/write transaction.
///
/// Writes are staged in an overlay that shadows the database for reads made
/// through this transaction; nothing reaches disk until the [`Store::update`]
/// closure returns `Ok` and the overlay commits as one write batch.
pub struct WriteTxn<'s> {
    db: &'s Database,
    staged: RefCell<BTreeMap<(Bucket, Vec<u8>), Option<Vec<u8>>>>,
}

impl WriteTxn<'_> {
    /// Stage a put.
    pub fn put(&self, bucket: Bucket, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.staged
            .borrow_mut()
            .insert((bucket, key.into()), Some(value.into()));
    }

    /// Stage a delete.
    pub fn delete(&self, bucket: Bucket, key: impl Into<Vec<u8>>) {
        self.staged.borrow_mut().insert((bucket, key.into()), None);
    }

    fn into_batch(self) -> StagedBatch {
        let staged = self.staged.into_inner();
        let mut ops = Vec::with_capacity(staged.len());
        for ((bucket, key), value) in staged {
            ops.push((bucket, key, value));
        }
        StagedBatch { ops }
    }
}

impl ReadView for WriteTxn<'_> {
    fn get(&self, bucket: Bucket, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.borrow().get(&(bucket, key.to_vec())) {
            return Ok(staged.clone());
        }
        self.db.get(bucket, key)
    }

    fn pairs(&self, bucket: Bucket) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.db.pairs(bucket)?.into_iter().collect();
        for ((staged_bucket, key), value) in self.staged.borrow().iter() {
            if *staged_bucket != bucket {
                continue;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

/// A bucketed store with transactional access.
pub struct Store {
    db: Database,
    writer: Mutex<()>,
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Ok(Self {
            db: Database::open(path)?,
            writer: Mutex::new(()),
        })
    }

    /// Run a read-only closure against the store.
    pub fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&ReadTxn<'_>) -> Result<T, E>,
    {
        let txn = ReadTxn { db: &self.db };
        f(&txn)
    }

    /// Run a read/write closure against the store.  All writes staged by the
    /// closure commit atomically when it returns `Ok`; on `Err` nothing is
    /// written.  Writers are serialised, one update at a time.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&WriteTxn<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let _writer = self.writer.lock();
        let txn = WriteTxn {
            db: &self.db,
            staged: RefCell::new(BTreeMap::new()),
        };
        let out = f(&txn)?;
        self.db.commit(txn.into_batch()).map_err(E::from)?;
        Ok(out)
    }
}
