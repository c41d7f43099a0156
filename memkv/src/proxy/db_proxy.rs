//! Routing between committed data and pessimistic locks.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::proxy::{Batch, KvClient, LOCK_VERSION, LocalProxy, Validate};
use crate::storage::{DbError, Record};

/// The engine handle handed to the rest of the system.
///
/// Operations at [`LOCK_VERSION`] go to the buffer store, everything else
/// to the local store.
#[derive(Debug, Clone)]
pub struct DbProxy {
    local: LocalProxy,
    buffer: LocalProxy,
}

impl DbProxy {
    /// Both stores in memory.
    pub fn new() -> Result<Self, DbError> {
        Ok(Self::with_stores(
            LocalProxy::open_in_memory()?,
            LocalProxy::open_in_memory()?,
        ))
    }

    /// Committed data persisted at `path`; locks stay in memory.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self, DbError> {
        Ok(Self::with_stores(
            LocalProxy::open(path, config)?,
            LocalProxy::open_in_memory()?,
        ))
    }

    #[must_use]
    pub const fn with_stores(local: LocalProxy, buffer: LocalProxy) -> Self {
        Self { local, buffer }
    }

    #[must_use]
    pub const fn local(&self) -> &LocalProxy {
        &self.local
    }

    #[must_use]
    pub const fn buffer(&self) -> &LocalProxy {
        &self.buffer
    }

    const fn store(&self, ts: u64) -> &LocalProxy {
        if ts == LOCK_VERSION {
            &self.buffer
        } else {
            &self.local
        }
    }

    /// Every version of `raw_key` in the buffer store if `locked`, in the
    /// local store otherwise.
    pub fn find_by_key(&self, raw_key: &[u8], locked: bool) -> Result<Vec<Arc<Record>>, DbError> {
        if locked {
            self.buffer.find_by_key(raw_key)
        } else {
            self.local.find_by_key(raw_key)
        }
    }
}

impl KvClient for DbProxy {
    fn put(&self, raw_key: &[u8], value: Vec<u8>, ts: u64) -> Result<(), DbError> {
        self.store(ts).put(raw_key, value, ts)
    }

    fn get(&self, raw_key: &[u8], ts: u64) -> Result<Option<Arc<Record>>, DbError> {
        self.store(ts).get_by_raw_key(raw_key, ts)
    }

    fn delete(&self, raw_key: &[u8], ts: u64) -> Result<(), DbError> {
        self.store(ts).delete(raw_key, ts)
    }

    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        ts: u64,
        limit: usize,
        desc: bool,
        validate: Option<Validate<'_>>,
    ) -> Result<Vec<Arc<Record>>, DbError> {
        self.store(ts).scan(start, end, ts, limit, desc, validate)
    }

    /// Each store applies its share of `batch` atomically; the two shares
    /// are not atomic with each other.
    fn write(&self, batch: Batch) -> Result<(), DbError> {
        let (locked, committed) = batch.partition_locked();
        self.buffer.write(locked)?;
        self.local.write(committed)
    }

    /// Close both stores, reporting the first failure.
    fn close(&self) -> Result<(), DbError> {
        let local = self.local.close();
        let buffer = self.buffer.close();
        local.and(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy() -> DbProxy {
        DbProxy::new().expect("open proxy")
    }

    #[test]
    fn test_locks_are_kept_apart() {
        let p = proxy();
        p.put(b"k", b"committed".to_vec(), 5).expect("put");
        p.put(b"k", b"lock".to_vec(), LOCK_VERSION).expect("lock");

        assert_eq!(p.get(b"k", 10).expect("get").expect("present").value, b"committed");
        assert_eq!(p.get(b"k", LOCK_VERSION).expect("get").expect("present").value, b"lock");

        let scanned = p.scan(b"", b"", 100, 10, false, None).expect("scan");
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].value, b"committed");

        assert_eq!(p.find_by_key(b"k", false).expect("find").len(), 1);
        let locks = p.find_by_key(b"k", true).expect("find");
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].commit_ts, LOCK_VERSION);
    }

    #[test]
    fn test_lock_release() {
        let p = proxy();
        p.put(b"k", Vec::new(), LOCK_VERSION).expect("lock");
        p.delete(b"k", LOCK_VERSION).expect("unlock");
        assert!(p.get(b"k", LOCK_VERSION).expect("get").is_none());
        assert!(matches!(p.delete(b"k", LOCK_VERSION), Err(DbError::NotFound)));
    }

    #[test]
    fn test_locked_scan_sees_locks() {
        let p = proxy();
        p.put(b"a", b"1".to_vec(), LOCK_VERSION).expect("lock");
        p.put(b"b", b"2".to_vec(), LOCK_VERSION).expect("lock");
        let locks = p.scan(b"a", b"z", LOCK_VERSION, 10, false, None).expect("scan");
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_write_routes_batch() {
        let p = proxy();
        let mut batch = Batch::new();
        batch.put(b"a", b"1".to_vec(), 1);
        batch.put(b"a", b"lock".to_vec(), LOCK_VERSION);
        p.write(batch).expect("write");
        assert_eq!(p.local().database().len().expect("len"), 1);
        assert_eq!(p.buffer().database().len().expect("len"), 1);
    }

    #[test]
    fn test_close_closes_both_stores() {
        let p = proxy();
        p.close().expect("close");
        assert!(matches!(p.local().database().len(), Err(DbError::DatabaseClosed)));
        assert!(matches!(p.buffer().database().len(), Err(DbError::DatabaseClosed)));
        assert!(matches!(p.close(), Err(DbError::DatabaseClosed)));
    }
}
