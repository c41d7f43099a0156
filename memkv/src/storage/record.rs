//! Records stored in the primary tree and shared with secondary indexes.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::storage::aof;
use crate::storage::codec::{mvcc_decode, mvcc_encode};

/// Kind of mutation a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    #[default]
    Put,
    Delete,
    Lock,
    Rollback,
    Insert,
    PessimisticLock,
    CheckNotExists,
}

/// A single stored version of a key.
///
/// `key` is the encoded key and determines the primary ordering; the other
/// fields are carried along for indexes and MVCC readers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub key: Vec<u8>,
    pub raw_key: Vec<u8>,
    pub value: Vec<u8>,
    pub value_type: u32,
    pub start_ts: u64,
    pub commit_ts: u64,
    pub op: Op,
    /// Expiry deadline in milliseconds since the Unix epoch; 0 never expires.
    pub ttl: u64,
    pub for_update_ts: u64,
    pub txn_size: u64,
    pub min_commit_ts: u64,
}

impl Record {
    /// A versioned record for `raw_key` committed at `commit_ts`.
    #[must_use]
    pub fn new(raw_key: &[u8], value: Vec<u8>, commit_ts: u64) -> Self {
        Self {
            key: mvcc_encode(raw_key, commit_ts),
            raw_key: raw_key.to_vec(),
            value,
            commit_ts,
            ..Self::default()
        }
    }

    /// A record addressed directly by its stored key.
    #[must_use]
    pub fn with_key(key: &[u8], value: Vec<u8>) -> Self {
        Self {
            key: key.to_vec(),
            value,
            ..Self::default()
        }
    }

    /// A value-less record used as a search bound.
    #[must_use]
    pub fn pivot(raw_key: &[u8], ts: u64) -> Self {
        Self {
            key: mvcc_encode(raw_key, ts),
            raw_key: raw_key.to_vec(),
            commit_ts: ts,
            ..Self::default()
        }
    }

    /// Rebuild a record read back from the log, where only the stored key
    /// and value survive. Keys that are not versioned keep `raw_key = key`.
    #[must_use]
    pub fn from_persisted(key: Vec<u8>, value: Vec<u8>) -> Self {
        let (raw_key, commit_ts) = mvcc_decode(&key).unwrap_or_else(|_| (key.clone(), 0));
        Self {
            key,
            raw_key,
            value,
            commit_ts,
            ..Self::default()
        }
    }

    /// Whether the record carries an expiry deadline that has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.ttl != 0 && now_ms() >= self.ttl
    }

    /// Append this record as a SET command.
    pub fn write_set_to(&self, buf: &mut Vec<u8>) {
        aof::append_set(buf, &self.key, &self.value);
    }

    /// Append a DEL command for this record's key.
    pub fn write_delete_to(&self, buf: &mut Vec<u8>) {
        aof::append_del(buf, &self.key);
    }
}

/// Milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
