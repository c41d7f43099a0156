//! Transactions.
//!
//! A transaction holds the database lock for its whole life: shared for
//! read-only transactions, exclusive for writable ones. Changes made by a
//! writable transaction are visible to it immediately and reach the log on
//! commit. Rolling back undoes every change through the undo log recorded as
//! the transaction went along.
//!
//! Scans take the visitor by `&self`, so a transaction cannot be mutated
//! while one of its scans is running.

use std::collections::{BTreeMap, HashMap};
use std::io::{Seek, SeekFrom, Write};
use std::ops::Deref;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use crate::config::SyncPolicy;
use crate::storage::aof;
use crate::storage::btree::BTree;
use crate::storage::database::{DbState, Keyspace, key_probe};
use crate::storage::error::DbError;
use crate::storage::index::{Index, IndexOptions, LessFn, compose};
use crate::storage::record::Record;

enum TxGuard<'db> {
    Read(RwLockReadGuard<'db, DbState>),
    Write(RwLockWriteGuard<'db, DbState>),
}

impl Deref for TxGuard<'_> {
    type Target = DbState;

    fn deref(&self) -> &DbState {
        match self {
            Self::Read(guard) => guard,
            Self::Write(guard) => guard,
        }
    }
}

/// Bookkeeping of a writable transaction.
#[derive(Default)]
struct WriteContext {
    /// Keyspace as it was when `delete_all` was first called.
    rollback_space: Option<Keyspace>,
    /// State of each touched key before its first change; `None` if absent.
    rollback_items: HashMap<Vec<u8>, Option<Arc<Record>>>,
    /// Latest state of each touched key; `None` if deleted.
    commit_items: BTreeMap<Vec<u8>, Option<Arc<Record>>>,
    /// Indexes to restore on rollback: `None` removes an index created in
    /// the transaction, `Some` rebuilds one dropped in it.
    rollback_indexes: HashMap<String, Option<Index>>,
}

/// Ordered traversal requested by the scan methods.
enum Scan {
    Ascend,
    AscendGreaterOrEqual(Arc<Record>),
    AscendLessThan(Arc<Record>),
    AscendRange(Arc<Record>, Arc<Record>),
    Descend,
    DescendLessOrEqual(Arc<Record>),
    DescendGreaterThan(Arc<Record>),
    DescendRange(Arc<Record>, Arc<Record>),
}

/// A database transaction.
///
/// # Invariants
///
/// - Once committed or rolled back, every operation fails with
///   [`DbError::TxClosed`]
/// - Dropping an open writable transaction rolls it back
pub struct Tx<'db> {
    guard: Option<TxGuard<'db>>,
    wc: Option<WriteContext>,
    managed: bool,
}

impl<'db> Tx<'db> {
    pub(crate) fn writable(guard: RwLockWriteGuard<'db, DbState>) -> Self {
        Self {
            guard: Some(TxGuard::Write(guard)),
            wc: Some(WriteContext::default()),
            managed: false,
        }
    }

    pub(crate) fn read_only(guard: RwLockReadGuard<'db, DbState>) -> Self {
        Self {
            guard: Some(TxGuard::Read(guard)),
            wc: None,
            managed: false,
        }
    }

    pub(crate) fn db_closed(&self) -> bool {
        self.guard.as_deref().is_none_or(|state| state.closed)
    }

    pub(crate) const fn set_managed(&mut self, managed: bool) {
        self.managed = managed;
    }

    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.wc.is_some()
    }

    fn state(&self) -> Result<&DbState, DbError> {
        self.guard.as_deref().ok_or(DbError::TxClosed)
    }

    fn write_parts(&mut self) -> Result<(&mut DbState, &mut WriteContext), DbError> {
        let guard = self.guard.as_mut().ok_or(DbError::TxClosed)?;
        let (TxGuard::Write(state), Some(wc)) = (guard, self.wc.as_mut()) else {
            return Err(DbError::TxNotWritable);
        };
        Ok((&mut **state, wc))
    }

    /// Write the changes to the log and release the lock.
    ///
    /// If the log write fails the changes are rolled back and the error is
    /// returned; the transaction is closed either way.
    pub fn commit(&mut self) -> Result<(), DbError> {
        if self.managed {
            return Err(DbError::InvalidOperation);
        }
        if self.guard.is_none() {
            return Err(DbError::TxClosed);
        }
        if !self.is_writable() {
            return Err(DbError::TxNotWritable);
        }
        let result = self.write_commit();
        if result.is_err() {
            self.rollback_inner();
        }
        self.close();
        result
    }

    /// Undo every change and release the lock.
    pub fn rollback(&mut self) -> Result<(), DbError> {
        if self.managed {
            return Err(DbError::InvalidOperation);
        }
        if self.guard.is_none() {
            return Err(DbError::TxClosed);
        }
        self.rollback_inner();
        self.close();
        Ok(())
    }

    fn close(&mut self) {
        self.wc = None;
        self.guard = None;
    }

    fn write_commit(&mut self) -> Result<(), DbError> {
        let (state, wc) = self.write_parts()?;
        if wc.rollback_space.is_none() && wc.commit_items.is_empty() {
            return Ok(());
        }
        let Some(file) = state.file.as_mut() else {
            return Ok(());
        };
        let mut buf = Vec::new();
        if wc.rollback_space.is_some() {
            aof::append_flushdb(&mut buf);
        }
        for (key, item) in &wc.commit_items {
            match item {
                Some(record) => record.write_set_to(&mut buf),
                None => aof::append_del(&mut buf, key),
            }
        }
        let start = file.stream_position()?;
        if let Err(e) = file.write_all(&buf) {
            tracing::error!("log write failed, truncating to {start}: {e}");
            if let Err(e) = file.set_len(start).and_then(|()| file.seek(SeekFrom::Start(start))) {
                tracing::error!("failed to truncate log after write error: {e}");
            }
            return Err(e.into());
        }
        if state.config.sync_policy == SyncPolicy::Always {
            file.sync_data()?;
        }
        state.flushes += 1;
        Ok(())
    }

    fn rollback_inner(&mut self) {
        let Ok((state, wc)) = self.write_parts() else {
            return;
        };
        if let Some(space) = wc.rollback_space.take() {
            state.space = space;
        }
        for (key, prior) in wc.rollback_items.drain() {
            state.space.delete_item(&key);
            if let Some(record) = prior {
                state.space.insert_item(record);
            }
        }
        for (name, idx) in wc.rollback_indexes.drain() {
            state.space.idxs.remove(&name);
            if let Some(mut idx) = idx {
                idx.rebuild(&state.space.keys);
                state.space.idxs.insert(name, idx);
            }
        }
        wc.commit_items.clear();
    }

    /// Number of records in the primary tree.
    pub fn len(&self) -> Result<usize, DbError> {
        Ok(self.state()?.space.keys.len())
    }

    pub fn is_empty(&self) -> Result<bool, DbError> {
        Ok(self.len()? == 0)
    }

    /// The record stored under `key`.
    ///
    /// Expired records are reported as [`DbError::NotFound`] unless
    /// `ignore_expired` is set.
    #[allow(clippy::disallowed_methods)] // Arc::clone hands out the shared record
    pub fn get_record(&self, key: &[u8], ignore_expired: bool) -> Result<Arc<Record>, DbError> {
        match self.state()?.space.get(key) {
            Some(record) if ignore_expired || !record.expired() => Ok(Arc::clone(record)),
            _ => Err(DbError::NotFound),
        }
    }

    /// The value stored under `key`.
    pub fn get(&self, key: &[u8], ignore_expired: bool) -> Result<Vec<u8>, DbError> {
        Ok(self.get_record(key, ignore_expired)?.value.clone())
    }

    /// Insert or replace `record`, returning the value it replaced.
    #[allow(clippy::disallowed_methods)] // Arc::clone keeps the stored record for the commit set
    pub fn set(&mut self, record: Record) -> Result<Option<Vec<u8>>, DbError> {
        let (state, wc) = self.write_parts()?;
        let record = Arc::new(record);
        let prev = state.space.insert_item(Arc::clone(&record));
        if wc.rollback_space.is_none() {
            wc.rollback_items
                .entry(record.key.clone())
                .or_insert_with(|| prev.clone());
        }
        let value = prev.map(|p| p.value.clone());
        wc.commit_items.insert(record.key.clone(), Some(record));
        Ok(value)
    }

    /// Delete the record stored under `key`, returning its value.
    #[allow(clippy::disallowed_methods)] // Arc::clone keeps the prior record for rollback
    pub fn delete(&mut self, key: &[u8]) -> Result<Vec<u8>, DbError> {
        let (state, wc) = self.write_parts()?;
        let prev = state.space.delete_item(key).ok_or(DbError::NotFound)?;
        if wc.rollback_space.is_none() {
            wc.rollback_items
                .entry(key.to_vec())
                .or_insert_with(|| Some(Arc::clone(&prev)));
        }
        wc.commit_items.insert(key.to_vec(), None);
        Ok(prev.value.clone())
    }

    /// Remove every record. Index definitions stay, emptied.
    pub fn delete_all(&mut self) -> Result<(), DbError> {
        let (state, wc) = self.write_parts()?;
        let empty = state.space.clear_copy();
        let previous = std::mem::replace(&mut state.space, empty);
        if wc.rollback_space.is_none() {
            wc.rollback_space = Some(previous);
        }
        wc.commit_items.clear();
        Ok(())
    }

    /// Create an index over records whose key matches `pattern`, ordered by
    /// `lessers` applied lexicographically.
    pub fn create_index(&mut self, name: &str, pattern: &str, lessers: Vec<LessFn>) -> Result<(), DbError> {
        self.create_index_options(name, pattern, IndexOptions::default(), lessers)
    }

    pub fn create_index_options(
        &mut self,
        name: &str,
        pattern: &str,
        opts: IndexOptions,
        lessers: Vec<LessFn>,
    ) -> Result<(), DbError> {
        let (state, wc) = self.write_parts()?;
        if name.is_empty() || state.space.idxs.contains_key(name) {
            return Err(DbError::IndexExists);
        }
        let mut idx = Index::new(name, pattern, opts, compose(lessers));
        idx.rebuild(&state.space.keys);
        tracing::debug!("created index '{name}' with {} items", idx.len());
        state.space.idxs.insert(name.to_string(), idx);
        if wc.rollback_space.is_none() {
            wc.rollback_indexes.entry(name.to_string()).or_insert(None);
        }
        Ok(())
    }

    /// Drop an index. The primary tree (the empty name) cannot be dropped.
    pub fn drop_index(&mut self, name: &str) -> Result<(), DbError> {
        let (state, wc) = self.write_parts()?;
        if name.is_empty() {
            return Err(DbError::InvalidOperation);
        }
        let idx = state.space.idxs.remove(name).ok_or(DbError::NotFound)?;
        if wc.rollback_space.is_none() {
            wc.rollback_indexes
                .entry(name.to_string())
                .or_insert_with(|| Some(idx.clear_copy()));
        }
        tracing::debug!("dropped index '{name}'");
        Ok(())
    }

    /// Sorted names of all secondary indexes.
    pub fn indexes(&self) -> Result<Vec<String>, DbError> {
        let mut names: Vec<String> = self.state()?.space.idxs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// The ordering of an index.
    pub fn get_less(&self, index: &str) -> Result<LessFn, DbError> {
        self.state()?
            .space
            .idxs
            .get(index)
            .and_then(Index::less)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    fn tree(&self, index: &str) -> Result<Option<&BTree<Arc<Record>>>, DbError> {
        let space = &self.state()?.space;
        if index.is_empty() {
            return Ok(Some(&space.keys));
        }
        let idx = space.idxs.get(index).ok_or(DbError::NotFound)?;
        Ok(idx.tree())
    }

    fn scan<F>(&self, index: &str, scan: Scan, visit: F) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        let Some(tree) = self.tree(index)? else {
            return Ok(());
        };
        match scan {
            Scan::Ascend => tree.ascend(visit),
            Scan::AscendGreaterOrEqual(pivot) => tree.ascend_greater_or_equal(&pivot, visit),
            Scan::AscendLessThan(pivot) => tree.ascend_less_than(&pivot, visit),
            Scan::AscendRange(ge, lt) => tree.ascend_range(&ge, &lt, visit),
            Scan::Descend => tree.descend(visit),
            Scan::DescendLessOrEqual(pivot) => tree.descend_less_or_equal(&pivot, visit),
            Scan::DescendGreaterThan(pivot) => tree.descend_greater_than(&pivot, visit),
            Scan::DescendRange(le, gt) => tree.descend_range(&le, &gt, visit),
        }
        Ok(())
    }

    /// Visit every item of `index` (the primary tree for `""`) in ascending
    /// order until `visit` returns false.
    pub fn ascend<F>(&self, index: &str, visit: F) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        self.scan(index, Scan::Ascend, visit)
    }

    /// Visit items `>= pivot` in ascending order.
    pub fn ascend_greater_or_equal<F>(&self, index: &str, pivot: Record, visit: F) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        self.scan(index, Scan::AscendGreaterOrEqual(Arc::new(pivot)), visit)
    }

    /// Visit items `< pivot` in ascending order.
    pub fn ascend_less_than<F>(&self, index: &str, pivot: Record, visit: F) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        self.scan(index, Scan::AscendLessThan(Arc::new(pivot)), visit)
    }

    /// Visit items in `[greater_or_equal, less_than)` in ascending order.
    pub fn ascend_range<F>(
        &self,
        index: &str,
        greater_or_equal: Record,
        less_than: Record,
        visit: F,
    ) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        self.scan(
            index,
            Scan::AscendRange(Arc::new(greater_or_equal), Arc::new(less_than)),
            visit,
        )
    }

    /// Visit items equal to `pivot` under the index ordering (the key for the
    /// primary tree).
    #[allow(clippy::disallowed_methods)] // Arc::clone shares the pivot with the bound check
    pub fn ascend_equal<F>(&self, index: &str, mut pivot: Record, mut visit: F) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        let less: LessFn = if index.is_empty() {
            Arc::new(|a: &Record, b: &Record| a.key < b.key)
        } else {
            // Ties fall back to key order; an empty key starts before every tie.
            pivot.key.clear();
            self.get_less(index)?
        };
        let pivot = Arc::new(pivot);
        self.scan(index, Scan::AscendGreaterOrEqual(Arc::clone(&pivot)), |record| {
            if less(pivot.as_ref(), record.as_ref()) {
                return false;
            }
            visit(record)
        })
    }

    /// Visit every item in descending order.
    pub fn descend<F>(&self, index: &str, visit: F) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        self.scan(index, Scan::Descend, visit)
    }

    /// Visit items `<= pivot` in descending order.
    pub fn descend_less_or_equal<F>(&self, index: &str, pivot: Record, visit: F) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        self.scan(index, Scan::DescendLessOrEqual(Arc::new(pivot)), visit)
    }

    /// Visit items `> pivot` in descending order.
    pub fn descend_greater_than<F>(&self, index: &str, pivot: Record, visit: F) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        self.scan(index, Scan::DescendGreaterThan(Arc::new(pivot)), visit)
    }

    /// Visit items in `(greater_than, less_or_equal]` in descending order.
    pub fn descend_range<F>(
        &self,
        index: &str,
        less_or_equal: Record,
        greater_than: Record,
        visit: F,
    ) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        self.scan(
            index,
            Scan::DescendRange(Arc::new(less_or_equal), Arc::new(greater_than)),
            visit,
        )
    }

    /// Visit primary records with `start <= key < stop`; an empty `stop`
    /// leaves the range open.
    pub fn scan_keys<F>(&self, start: &[u8], stop: &[u8], visit: F) -> Result<(), DbError>
    where
        F: FnMut(&Arc<Record>) -> bool,
    {
        let scan = if stop.is_empty() {
            Scan::AscendGreaterOrEqual(key_probe(start))
        } else {
            Scan::AscendRange(key_probe(start), key_probe(stop))
        };
        self.scan("", scan, visit)
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            self.rollback_inner();
        }
    }
}
