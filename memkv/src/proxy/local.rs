//! A proxy over a single database.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::proxy::{Batch, BatchOp, KvClient, Validate, visible};
use crate::storage::codec::mvcc_encode;
use crate::storage::{Database, DbError, Record, index_commit_ts, index_raw_key, less};

/// Index ordering every version by raw key, then commit timestamp.
pub const RAW_KEY_COMMIT_TS_INDEX: &str = "raw_key_commit_ts";

/// Versioned reads and writes against one [`Database`].
///
/// # Invariants
///
/// - The database always carries [`RAW_KEY_COMMIT_TS_INDEX`]
/// - Every record written through the proxy has a non-empty raw key
#[derive(Debug, Clone)]
pub struct LocalProxy {
    db: Arc<Database>,
}

impl LocalProxy {
    /// Wrap `db`, creating the version index if it is missing.
    pub fn new(db: Arc<Database>) -> Result<Self, DbError> {
        match db.create_index(
            RAW_KEY_COMMIT_TS_INDEX,
            "*",
            vec![less(index_raw_key), less(index_commit_ts)],
        ) {
            Ok(()) | Err(DbError::IndexExists) => Ok(Self { db }),
            Err(e) => Err(e),
        }
    }

    /// A proxy over a fresh in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::new(Database::open_in_memory(Config::default()))
    }

    /// A proxy over the database at `path`.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self, DbError> {
        Self::new(Database::open(path, config)?)
    }

    #[must_use]
    pub const fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Store `value` as the version of `raw_key` committed at `commit_ts`.
    /// Empty keys are ignored.
    pub fn put(&self, raw_key: &[u8], value: Vec<u8>, commit_ts: u64) -> Result<(), DbError> {
        if raw_key.is_empty() {
            return Ok(());
        }
        self.db.put(Record::new(raw_key, value, commit_ts))?;
        Ok(())
    }

    /// Store a prepared record under the key derived from its raw key and
    /// commit timestamp. Records with an empty raw key are ignored.
    pub fn put_record(&self, mut record: Record) -> Result<(), DbError> {
        if record.raw_key.is_empty() {
            return Ok(());
        }
        record.key = mvcc_encode(&record.raw_key, record.commit_ts);
        self.db.put(record)?;
        Ok(())
    }

    /// The newest version of `raw_key` committed at or before `ts`.
    #[allow(clippy::disallowed_methods)] // Arc::clone hands out the shared record
    pub fn get_by_raw_key(&self, raw_key: &[u8], ts: u64) -> Result<Option<Arc<Record>>, DbError> {
        self.db.view(|tx| {
            let mut found = None;
            tx.descend_less_or_equal(
                RAW_KEY_COMMIT_TS_INDEX,
                Record::pivot(raw_key, ts),
                |record| {
                    if record.raw_key == raw_key && record.commit_ts <= ts {
                        found = Some(Arc::clone(record));
                    }
                    false
                },
            )?;
            Ok(found)
        })
    }

    /// The newest version visible at `ts` of every key in `[start, end]`,
    /// in raw key order.
    ///
    /// Keys whose visible version is rejected by `validate` are skipped. At
    /// most `limit` records are returned. An empty `end` leaves the range
    /// open.
    #[allow(clippy::disallowed_methods)] // Arc::clone hands out shared records
    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        ts: u64,
        limit: usize,
        desc: bool,
        validate: Option<Validate<'_>>,
    ) -> Result<Vec<Arc<Record>>, DbError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.db.view(|tx| {
            let mut out = Vec::new();
            if desc {
                let mut decided: Option<Vec<u8>> = None;
                let visit = |record: &Arc<Record>| {
                    if record.raw_key.as_slice() < start {
                        return false;
                    }
                    if decided.as_deref() == Some(record.raw_key.as_slice())
                        || !visible(record.commit_ts, ts)
                    {
                        return true;
                    }
                    decided = Some(record.raw_key.clone());
                    accept(Arc::clone(record), validate, &mut out);
                    out.len() < limit
                };
                if end.is_empty() {
                    tx.descend(RAW_KEY_COMMIT_TS_INDEX, visit)?;
                } else {
                    let pivot = Record::pivot(end, u64::MAX);
                    tx.descend_less_or_equal(RAW_KEY_COMMIT_TS_INDEX, pivot, visit)?;
                }
            } else {
                // Versions arrive oldest first, so the newest visible one is
                // only known once the walk moves past its key.
                let mut newest: Option<Arc<Record>> = None;
                tx.ascend_greater_or_equal(
                    RAW_KEY_COMMIT_TS_INDEX,
                    Record::pivot(start, 0),
                    |record| {
                        if !end.is_empty() && record.raw_key.as_slice() > end {
                            return false;
                        }
                        if let Some(prev) = newest.take_if(|prev| prev.raw_key != record.raw_key) {
                            accept(prev, validate, &mut out);
                            if out.len() >= limit {
                                return false;
                            }
                        }
                        if visible(record.commit_ts, ts) {
                            newest = Some(Arc::clone(record));
                        }
                        true
                    },
                )?;
                if let Some(prev) = newest
                    && out.len() < limit
                {
                    accept(prev, validate, &mut out);
                }
            }
            Ok(out)
        })
    }

    /// Every stored version of `raw_key`, oldest first.
    #[allow(clippy::disallowed_methods)] // Arc::clone hands out shared records
    pub fn find_by_key(&self, raw_key: &[u8]) -> Result<Vec<Arc<Record>>, DbError> {
        self.db.view(|tx| {
            let mut out = Vec::new();
            tx.ascend_greater_or_equal(
                RAW_KEY_COMMIT_TS_INDEX,
                Record::pivot(raw_key, 0),
                |record| {
                    if record.raw_key != raw_key {
                        return false;
                    }
                    out.push(Arc::clone(record));
                    true
                },
            )?;
            Ok(out)
        })
    }

    /// Remove the version of `raw_key` committed at `commit_ts`.
    pub fn delete(&self, raw_key: &[u8], commit_ts: u64) -> Result<(), DbError> {
        self.db.delete(&mvcc_encode(raw_key, commit_ts))?;
        Ok(())
    }

    /// Apply `batch` in one write transaction. A delete of a missing
    /// version fails the whole batch with [`DbError::NotFound`].
    pub fn write(&self, batch: Batch) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.db.update(|tx| {
            for op in batch {
                match op {
                    BatchOp::Put { raw_key, value, ts } => {
                        tx.set(Record::new(&raw_key, value, ts))?;
                    }
                    BatchOp::Delete { raw_key, ts } => {
                        tx.delete(&mvcc_encode(&raw_key, ts))?;
                    }
                }
            }
            Ok(())
        })
    }

    pub fn close(&self) -> Result<(), DbError> {
        self.db.close()
    }
}

fn accept(record: Arc<Record>, validate: Option<Validate<'_>>, out: &mut Vec<Arc<Record>>) {
    if validate.is_none_or(|validate| validate(&record)) {
        out.push(record);
    }
}

impl KvClient for LocalProxy {
    fn put(&self, raw_key: &[u8], value: Vec<u8>, ts: u64) -> Result<(), DbError> {
        Self::put(self, raw_key, value, ts)
    }

    fn get(&self, raw_key: &[u8], ts: u64) -> Result<Option<Arc<Record>>, DbError> {
        self.get_by_raw_key(raw_key, ts)
    }

    fn delete(&self, raw_key: &[u8], ts: u64) -> Result<(), DbError> {
        Self::delete(self, raw_key, ts)
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
        Self::scan(self, start, end, ts, limit, desc, validate)
    }

    fn write(&self, batch: Batch) -> Result<(), DbError> {
        Self::write(self, batch)
    }

    fn close(&self) -> Result<(), DbError> {
        Self::close(self)
    }
}
