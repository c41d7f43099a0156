#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! An embedded, ordered, multi-version key-value store.
//!
//! Layers, bottom up:
//! - [`storage::codec`]: memcomparable encoding of versioned keys
//! - [`storage::btree`]: the ordered tree holding records and indexes
//! - [`storage`]: transactions, secondary indexes and the append-only log
//! - [`proxy`]: versioned reads, writes and scans over raw keys
//!
//! Configuration comes from [`config::Config`], either built in code or read
//! from `MEMKV_*` environment variables.

pub mod config;
pub mod proxy;
pub mod storage;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;
