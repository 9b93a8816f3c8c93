//! # aero-tests
//!
//! Integration tests for the Aero wallet address manager:
//! - end-to-end scenarios covering bootstrap, locking, syncing, imports,
//!   passphrase changes, and watching-only conversion
//! - property-based tests for the crypto primitives and index bookkeeping

pub mod harness;

#[cfg(test)]
mod scenario_tests;

#[cfg(test)]
mod property_tests;

pub use harness::*;
