//! Ordered key-value storage engine.
//!
//! Records live in an in-memory B-tree ordered by their encoded key, with any
//! number of secondary indexes kept in step. Changes go through
//! transactions and, for disk-backed databases, are appended to a log that
//! is replayed on open and compacted in the background.
//!
//! # Keys
//!
//! Versioned records use a memcomparable encoding of the user key followed
//! by the inverted commit timestamp (see [`codec::mvcc_encode`]), so the
//! versions of one key sort together, newest first.
//!
//! # Usage
//!
//! ```
//! use memkv::config::Config;
//! use memkv::storage::{Database, MEMORY_PATH, Record};
//!
//! let db = Database::open(MEMORY_PATH, Config::default())?;
//! db.update(|tx| {
//!     tx.set(Record::new(b"user:1", b"alice".to_vec(), 10))?;
//!     Ok(())
//! })?;
//! assert_eq!(db.len()?, 1);
//! # Ok::<(), memkv::storage::DbError>(())
//! ```

mod aof;
mod background;
pub mod btree;
pub mod codec;
mod database;
mod error;
mod index;
mod pattern;
mod record;
mod transaction;

pub use database::{Database, MEMORY_PATH};
pub use error::DbError;
pub use index::{
    Index, IndexOptions, LessFn, compose, desc, index_commit_ts, index_key, index_raw_key,
    index_raw_key_len, index_start_ts, less,
};
pub use pattern::glob_match;
pub use record::{Op, Record, now_ms};
pub use transaction::Tx;
