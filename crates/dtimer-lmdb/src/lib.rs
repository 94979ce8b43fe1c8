//! LMDB-backed schedule store
//!
//! Implements the `dtimer-core` store traits on top of LMDB:
//! - Score-ordered sets with order-preserving big-endian score keys
//! - Hashes and plain values in their own databases
//! - Single-writer transactions, so every multi-key update is atomic and
//!   linearizable across threads and processes sharing the environment

pub mod keys;
pub mod store;
pub mod txn;

pub use store::LmdbScheduleStore;
pub use txn::{LmdbReadTxn, LmdbWriteTxn};
