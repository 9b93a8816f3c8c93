//! # aero-store
//!
//! Storage layer for the Aero wallet.
//!
//! This crate provides a RocksDB-backed bucketed key-value store with
//! transactional access:
//! - [`Bucket`]: the fixed namespaces of the wallet schema, one RocksDB
//!   column family each
//! - [`Store::view`]: read-only access through a [`ReadTxn`]
//! - [`Store::update`]: read/write access through a [`WriteTxn`] that stages
//!   every mutation in an overlay and commits atomically as a single write
//!   batch; an error from the closure discards the overlay
//!
//! Updates are serialised by a writer mutex, so at most one write
//! transaction is in flight and readers never observe partial writes.

mod database;
mod error;
mod txn;

pub use database::{Bucket, Database};
pub use error::{StoreError, StoreResult};
pub use txn::{ReadTxn, ReadView, Store, WriteTxn};
