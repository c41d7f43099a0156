//! MVCC read and scan proxy.
//!
//! The proxy turns (raw key, timestamp) pairs into versioned records stored
//! in a [`Database`](crate::storage::Database). Every version of a key is
//! kept; reads pick the newest version their timestamp can see.
//!
//! # Regions
//!
//! [`DbProxy`] keeps two stores side by side:
//! - **local**: committed data, read at ordinary timestamps
//! - **buffer**: pessimistic locks, written and read at [`LOCK_VERSION`]
//!
//! Lock records never show up in scans of committed data.

mod db_proxy;
mod local;

use std::sync::Arc;

use crate::storage::{DbError, Record};

pub use db_proxy::DbProxy;
pub use local::{LocalProxy, RAW_KEY_COMMIT_TS_INDEX};

/// Timestamp reserved for pessimistic locks.
pub const LOCK_VERSION: u64 = u64::MAX;

/// Predicate deciding whether a scan candidate is kept.
pub type Validate<'a> = &'a dyn Fn(&Record) -> bool;

/// Whether a version committed at `commit_ts` is visible at read timestamp
/// `ts`. Reads at [`LOCK_VERSION`] see every version.
#[must_use]
pub const fn visible(commit_ts: u64, ts: u64) -> bool {
    commit_ts < ts || ts == LOCK_VERSION
}

/// The operations the rest of the system may depend on.
pub trait KvClient: Send + Sync {
    /// Store `value` as the version of `raw_key` committed at `ts`.
    fn put(&self, raw_key: &[u8], value: Vec<u8>, ts: u64) -> Result<(), DbError>;

    /// The newest version of `raw_key` committed at or before `ts`.
    fn get(&self, raw_key: &[u8], ts: u64) -> Result<Option<Arc<Record>>, DbError>;

    /// Remove the version of `raw_key` committed at `ts`.
    fn delete(&self, raw_key: &[u8], ts: u64) -> Result<(), DbError>;

    /// The newest visible version of every key in `[start, end]`, at most
    /// `limit` of them. An empty `end` leaves the range open.
    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        ts: u64,
        limit: usize,
        desc: bool,
        validate: Option<Validate<'_>>,
    ) -> Result<Vec<Arc<Record>>, DbError>;

    /// Apply every operation of `batch` or none of them.
    fn write(&self, batch: Batch) -> Result<(), DbError>;

    fn close(&self) -> Result<(), DbError>;
}

/// One operation of a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { raw_key: Vec<u8>, value: Vec<u8>, ts: u64 },
    Delete { raw_key: Vec<u8>, ts: u64 },
}

impl BatchOp {
    #[must_use]
    pub const fn ts(&self) -> u64 {
        match self {
            Self::Put { ts, .. } | Self::Delete { ts, .. } => *ts,
        }
    }
}

/// Puts and deletes applied together, in the order they were added.
///
/// Operations on empty keys are dropped when added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, raw_key: &[u8], value: Vec<u8>, ts: u64) {
        if raw_key.is_empty() {
            return;
        }
        self.ops.push(BatchOp::Put {
            raw_key: raw_key.to_vec(),
            value,
            ts,
        });
    }

    pub fn delete(&mut self, raw_key: &[u8], ts: u64) {
        if raw_key.is_empty() {
            return;
        }
        self.ops.push(BatchOp::Delete {
            raw_key: raw_key.to_vec(),
            ts,
        });
    }

    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Split into the operations at [`LOCK_VERSION`] and the rest.
    #[must_use]
    pub fn partition_locked(self) -> (Self, Self) {
        let (locked, committed) = self
            .ops
            .into_iter()
            .partition(|op| op.ts() == LOCK_VERSION);
        (Self { ops: locked }, Self { ops: committed })
    }
}

impl IntoIterator for Batch {
    type Item = BatchOp;
    type IntoIter = std::vec::IntoIter<BatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}
