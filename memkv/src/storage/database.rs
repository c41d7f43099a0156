//! The database handle.
//!
//! A [`Database`] owns the primary tree, the secondary indexes and, when it
//! is backed by a file, the append-only log. All access goes through
//! transactions: any number of read-only transactions may run together, a
//! writable transaction runs alone.
//!
//! # Persistence
//!
//! Every committed write transaction appends its changes to the log as SET,
//! DEL and FLUSHDB commands. Opening a database replays the log. A command
//! cut short by a crash at the end of the log is dropped and the file is
//! truncated to the last complete command.
//!
//! The log only ever grows, so [`Database::shrink`] rewrites it to one SET per
//! live key. A background thread triggers this automatically and performs
//! the once-per-second fsync of [`SyncPolicy::EverySecond`].

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::{Config, SyncPolicy};
use crate::storage::aof::{Command, CommandReader};
use crate::storage::background::{self, Background};
use crate::storage::btree::{BTree, DEFAULT_DEGREE};
use crate::storage::error::DbError;
use crate::storage::index::{Index, IndexOptions, LessFn};
use crate::storage::record::Record;
use crate::storage::transaction::Tx;

/// Path that opens a database with no backing file.
pub const MEMORY_PATH: &str = ":memory:";

/// `save` hands data to the writer in chunks of about this size.
const SAVE_FLUSH_BYTES: usize = 4 * 1024 * 1024;
/// Shrink copies at most this many items per read lock.
const SHRINK_BATCH_ITEMS: usize = 1000;
/// Shrink copies at most this many bytes per read lock.
const SHRINK_BATCH_BYTES: usize = 64 * 1024 * 1024;

/// The primary tree together with every secondary index.
#[derive(Clone, Debug)]
pub(crate) struct Keyspace {
    pub(crate) keys: BTree<Arc<Record>>,
    pub(crate) idxs: HashMap<String, Index>,
}

impl Keyspace {
    pub(crate) fn new() -> Self {
        Self {
            keys: BTree::new(
                DEFAULT_DEGREE,
                Arc::new(|a: &Arc<Record>, b: &Arc<Record>| a.key < b.key),
            ),
            idxs: HashMap::new(),
        }
    }

    /// An empty keyspace with the same index definitions.
    pub(crate) fn clear_copy(&self) -> Self {
        Self {
            keys: self.keys.clear_copy(),
            idxs: self
                .idxs
                .iter()
                .map(|(name, idx)| (name.clone(), idx.clear_copy()))
                .collect(),
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<&Arc<Record>> {
        self.keys.get(&key_probe(key))
    }

    /// Insert or replace `record`, keeping every index in step. Returns the
    /// record it replaced.
    #[allow(clippy::disallowed_methods)] // Arc::clone shares the record between the primary and index trees
    pub(crate) fn insert_item(&mut self, record: Arc<Record>) -> Option<Arc<Record>> {
        let prev = self.keys.replace_or_insert(Arc::clone(&record));
        for idx in self.idxs.values_mut() {
            if let Some(prev) = &prev {
                idx.remove(prev);
            }
            idx.insert(&record);
        }
        prev
    }

    /// Remove the record stored under `key` from the primary tree and every
    /// index.
    pub(crate) fn delete_item(&mut self, key: &[u8]) -> Option<Arc<Record>> {
        let prev = self.keys.delete(&key_probe(key))?;
        for idx in self.idxs.values_mut() {
            idx.remove(&prev);
        }
        Some(prev)
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Set { key, value } => {
                self.insert_item(Arc::new(Record::from_persisted(key, value)));
            }
            Command::Del { key } => {
                self.delete_item(&key);
            }
            Command::FlushDb => *self = self.clear_copy(),
        }
    }
}

/// A search key for the primary tree.
pub(crate) fn key_probe(key: &[u8]) -> Arc<Record> {
    Arc::new(Record::with_key(key, Vec::new()))
}

/// Everything guarded by the database lock.
pub(crate) struct DbState {
    pub(crate) space: Keyspace,
    pub(crate) file: Option<File>,
    pub(crate) config: Config,
    /// Number of commits written to the log.
    pub(crate) flushes: u64,
    pub(crate) closed: bool,
    shrinking: bool,
    /// Size of the log after the last shrink or open.
    last_aof_size: u64,
}

/// An embedded ordered key-value database.
pub struct Database {
    state: RwLock<DbState>,
    path: Option<PathBuf>,
    background: Mutex<Option<Background>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open the database at `path`, creating the file if needed.
    ///
    /// The path [`MEMORY_PATH`] opens a database without a backing file.
    /// A disk-backed database starts a background thread that stops when the
    /// database is closed or dropped.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Arc<Self>, DbError> {
        let path = path.as_ref();
        if path.as_os_str() == MEMORY_PATH {
            return Ok(Self::open_in_memory(config));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut space = Keyspace::new();
        let size = replay_log(&mut file, &mut space, path)?;
        tracing::info!(
            "opened database at {} with {} keys",
            path.display(),
            space.keys.len()
        );

        let db = Arc::new(Self {
            state: RwLock::new(DbState {
                space,
                file: Some(file),
                config,
                flushes: 0,
                closed: false,
                shrinking: false,
                last_aof_size: size,
            }),
            path: Some(path.to_path_buf()),
            background: Mutex::new(None),
        });
        let handle = background::spawn(Arc::downgrade(&db))?;
        *db.background.lock()? = Some(handle);
        Ok(db)
    }

    /// Open a database that lives only in memory.
    #[must_use]
    pub fn open_in_memory(config: Config) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(DbState {
                space: Keyspace::new(),
                file: None,
                config,
                flushes: 0,
                closed: false,
                shrinking: false,
                last_aof_size: 0,
            }),
            path: None,
            background: Mutex::new(None),
        })
    }

    /// The backing file, or `None` for an in-memory database.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the database: sync and release the log, drop all data and stop
    /// the background thread.
    pub fn close(&self) -> Result<(), DbError> {
        let synced = {
            let mut state = self.state.write()?;
            if state.closed {
                return Err(DbError::DatabaseClosed);
            }
            state.closed = true;
            state.space = Keyspace::new();
            state.file.take().map(|file| file.sync_all())
        };
        if let Some(handle) = self.background.lock()?.take() {
            handle.stop();
        }
        if let Some(path) = &self.path {
            tracing::info!("closed database at {}", path.display());
        }
        synced.transpose()?;
        Ok(())
    }

    /// Start a transaction. A writable transaction holds the exclusive lock
    /// until it is committed, rolled back or dropped.
    pub fn begin(&self, writable: bool) -> Result<Tx<'_>, DbError> {
        let tx = if writable {
            Tx::writable(self.state.write()?)
        } else {
            Tx::read_only(self.state.read()?)
        };
        if tx.db_closed() {
            return Err(DbError::DatabaseClosed);
        }
        Ok(tx)
    }

    /// Run `f` in a read-only transaction.
    pub fn view<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T, DbError>,
    {
        self.managed(false, f)
    }

    /// Run `f` in a writable transaction, committing if it returns `Ok` and
    /// rolling back otherwise.
    pub fn update<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T, DbError>,
    {
        self.managed(true, f)
    }

    fn managed<T, F>(&self, writable: bool, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T, DbError>,
    {
        let mut tx = self.begin(writable)?;
        tx.set_managed(true);
        let value = f(&mut tx)?;
        tx.set_managed(false);
        if writable {
            tx.commit()?;
        } else {
            tx.rollback()?;
        }
        Ok(value)
    }

    /// Insert or replace a single record.
    pub fn put(&self, record: Record) -> Result<Option<Vec<u8>>, DbError> {
        self.update(|tx| tx.set(record))
    }

    /// Look up the record stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Arc<Record>>, DbError> {
        self.view(|tx| match tx.get_record(key, false) {
            Ok(record) => Ok(Some(record)),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(e),
        })
    }

    /// Delete the record stored under `key`, returning its value.
    pub fn delete(&self, key: &[u8]) -> Result<Vec<u8>, DbError> {
        self.update(|tx| tx.delete(key))
    }

    /// Number of records in the primary tree.
    pub fn len(&self) -> Result<usize, DbError> {
        self.view(|tx| tx.len())
    }

    pub fn is_empty(&self) -> Result<bool, DbError> {
        Ok(self.len()? == 0)
    }

    /// Records with `start <= key < stop` in key order. An empty `stop`
    /// leaves the range open.
    #[allow(clippy::disallowed_methods)] // Arc::clone hands out shared records
    pub fn range(&self, start: &[u8], stop: &[u8]) -> Result<Vec<Arc<Record>>, DbError> {
        self.view(|tx| {
            let mut out = Vec::new();
            tx.scan_keys(start, stop, |record| {
                out.push(Arc::clone(record));
                true
            })?;
            Ok(out)
        })
    }

    pub fn create_index(
        &self,
        name: &str,
        pattern: &str,
        lessers: Vec<LessFn>,
    ) -> Result<(), DbError> {
        self.update(|tx| tx.create_index(name, pattern, lessers))
    }

    pub fn create_index_options(
        &self,
        name: &str,
        pattern: &str,
        opts: IndexOptions,
        lessers: Vec<LessFn>,
    ) -> Result<(), DbError> {
        self.update(|tx| tx.create_index_options(name, pattern, opts, lessers))
    }

    /// Create an index, replacing any existing index of the same name.
    pub fn replace_index(
        &self,
        name: &str,
        pattern: &str,
        lessers: Vec<LessFn>,
    ) -> Result<(), DbError> {
        self.update(|tx| match tx.create_index(name, pattern, lessers.clone()) {
            Err(DbError::IndexExists) => {
                tx.drop_index(name)?;
                tx.create_index(name, pattern, lessers)
            }
            other => other,
        })
    }

    pub fn drop_index(&self, name: &str) -> Result<(), DbError> {
        self.update(|tx| tx.drop_index(name))
    }

    /// Sorted names of all secondary indexes.
    pub fn indexes(&self) -> Result<Vec<String>, DbError> {
        self.view(|tx| tx.indexes())
    }

    pub fn read_config(&self) -> Result<Config, DbError> {
        let state = self.state.read()?;
        if state.closed {
            return Err(DbError::DatabaseClosed);
        }
        Ok(state.config)
    }

    pub fn set_config(&self, config: Config) -> Result<(), DbError> {
        let mut state = self.state.write()?;
        if state.closed {
            return Err(DbError::DatabaseClosed);
        }
        state.config = config;
        Ok(())
    }

    /// Write every record as a SET command to `writer`, in key order.
    ///
    /// Blocks writers but not readers. The output can be fed to [`load`].
    ///
    /// [`load`]: Database::load
    pub fn save<W: Write>(&self, mut writer: W) -> Result<(), DbError> {
        let state = self.state.read()?;
        if state.closed {
            return Err(DbError::DatabaseClosed);
        }
        let mut buf = Vec::new();
        let mut failed = None;
        state.space.keys.ascend(|record| {
            record.write_set_to(&mut buf);
            if buf.len() > SAVE_FLUSH_BYTES {
                if let Err(e) = writer.write_all(&buf) {
                    failed = Some(e);
                    return false;
                }
                buf.clear();
            }
            true
        });
        if let Some(e) = failed {
            return Err(e.into());
        }
        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(())
    }

    /// Replay commands from `reader` on top of the current data.
    ///
    /// Only allowed for in-memory databases. Either every command is applied
    /// or, on a malformed stream, none is.
    pub fn load<R: Read>(&self, reader: R) -> Result<(), DbError> {
        let mut state = self.state.write()?;
        if state.closed {
            return Err(DbError::DatabaseClosed);
        }
        if self.path.is_some() {
            return Err(DbError::PersistenceActive);
        }
        let mut staged = state.space.clone();
        let mut commands = CommandReader::new(BufReader::new(reader));
        while let Some(command) = commands.next_command()? {
            staged.apply(command);
        }
        state.space = staged;
        Ok(())
    }

    /// Rewrite the log so it holds one SET per live record.
    ///
    /// Records are copied in batches under short read locks, so readers and
    /// writers keep running. Commands committed meanwhile are carried over
    /// from the old log before the new file replaces it. If anything fails
    /// the old log stays in place.
    pub fn shrink(&self) -> Result<(), DbError> {
        let (path, end_pos) = {
            let mut state = self.state.write()?;
            if state.closed {
                return Err(DbError::DatabaseClosed);
            }
            let Some(path) = self.path.clone() else {
                return Ok(());
            };
            if state.shrinking {
                return Err(DbError::ShrinkInProcess);
            }
            let file = state.file.as_mut().ok_or(DbError::DatabaseClosed)?;
            let end_pos = file.seek(SeekFrom::End(0))?;
            state.shrinking = true;
            (path, end_pos)
        };
        let _shrinking = ShrinkFlag { db: self };

        let mut tmp_name = path.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        tracing::info!("shrinking {} ({end_pos} bytes)", path.display());
        let result = self.shrink_into(&path, &tmp_path, end_pos);
        if let Err(e) = &result {
            tracing::warn!("shrink of {} failed: {e}", path.display());
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone keeps the resume pivot alive across batches
    fn shrink_into(&self, path: &Path, tmp_path: &Path, end_pos: u64) -> Result<(), DbError> {
        let mut tmp = File::create(tmp_path)?;
        let mut buf = Vec::new();
        let mut pivot: Option<Arc<Record>> = None;
        loop {
            {
                let state = self.state.read()?;
                if state.closed {
                    return Err(DbError::DatabaseClosed);
                }
                let mut n = 0;
                let mut next = None;
                let mut visit = |record: &Arc<Record>| {
                    if shrink_batch_full(n, buf.len()) {
                        next = Some(Arc::clone(record));
                        return false;
                    }
                    record.write_set_to(&mut buf);
                    n += 1;
                    true
                };
                match &pivot {
                    Some(pivot) => state.space.keys.ascend_greater_or_equal(pivot, &mut visit),
                    None => state.space.keys.ascend(&mut visit),
                }
                pivot = next;
            }
            tmp.write_all(&buf)?;
            buf.clear();
            if pivot.is_none() {
                break;
            }
        }

        let mut state = self.state.write()?;
        if state.closed {
            return Err(DbError::DatabaseClosed);
        }
        let mut aof = File::open(path)?;
        aof.seek(SeekFrom::Start(end_pos))?;
        std::io::copy(&mut aof, &mut tmp)?;
        tmp.sync_all()?;
        drop(tmp);
        drop(aof);
        std::fs::rename(tmp_path, path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.seek(SeekFrom::End(0))?;
        state.file = Some(file);
        state.last_aof_size = size;
        tracing::info!("shrank {} to {size} bytes", path.display());
        Ok(())
    }

    /// One pass of the background thread. Fsyncs under `EverySecond` when
    /// commits happened since the last pass and reports whether the log has
    /// grown enough to shrink.
    pub(crate) fn background_tick(&self, synced_flushes: &mut u64) -> Result<bool, DbError> {
        let mut guard = self.state.write()?;
        let state = &mut *guard;
        if state.closed {
            return Err(DbError::DatabaseClosed);
        }
        let Some(file) = state.file.as_mut() else {
            return Ok(false);
        };
        let config = state.config;
        let mut shrink = false;
        if !config.auto_shrink_disabled {
            let size = file.seek(SeekFrom::End(0))?;
            if size > config.auto_shrink_min_size {
                let growth = state.last_aof_size.saturating_mul(config.auto_shrink_percentage) / 100;
                shrink = size > state.last_aof_size.saturating_add(growth);
            }
        }
        if config.sync_policy == SyncPolicy::EverySecond && *synced_flushes != state.flushes {
            file.sync_data()?;
            *synced_flushes = state.flushes;
        }
        Ok(shrink)
    }
}


/// Clears the `shrinking` flag when a shrink ends, however it ends.
struct ShrinkFlag<'a> {
    db: &'a Database,
}

impl Drop for ShrinkFlag<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.db.state.write() {
            state.shrinking = false;
        }
    }
}

/// Replay the log in `file` into `space`. Returns the size of the valid log,
/// truncating a torn final command.
/// Whether a shrink batch holding `items` records in `bytes` bytes must end.
const fn shrink_batch_full(items: usize, bytes: usize) -> bool {
    items >= SHRINK_BATCH_ITEMS || bytes > SHRINK_BATCH_BYTES
}

fn replay_log(file: &mut File, space: &mut Keyspace, path: &Path) -> Result<u64, DbError> {
    let mut commands = CommandReader::new(BufReader::new(&*file));
    loop {
        match commands.next_command() {
            Ok(Some(command)) => space.apply(command),
            Ok(None) => break,
            Err(e) if e.is_unexpected_eof() => {
                let valid = commands.offset();
                tracing::warn!(
                    "truncating torn command at end of {} (offset {valid})",
                    path.display()
                );
                file.set_len(valid)?;
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(file.seek(SeekFrom::End(0))?)
}
