//! Errors returned by the storage engine.

use crate::storage::codec::CodecError;

/// Errors that can occur during database and transaction operations.
#[derive(Debug)]
pub enum DbError {
    /// The transaction was already committed or rolled back.
    TxClosed,
    /// A write was attempted on a read-only transaction.
    TxNotWritable,
    /// A mutation was attempted while the transaction was iterating.
    TxIterating,
    /// The item or index does not exist.
    NotFound,
    /// An index with this name already exists, or the name is empty.
    IndexExists,
    /// The operation is not allowed in this context.
    InvalidOperation,
    /// The sync policy value is out of range.
    InvalidSyncPolicy,
    /// A shrink is already running.
    ShrinkInProcess,
    /// The database is backed by a file, so `load` is not allowed.
    PersistenceActive,
    /// The database has been closed.
    DatabaseClosed,
    /// The persisted log is malformed.
    Invalid,
    /// A stored key could not be decoded.
    InvalidEncodedKey(CodecError),
    /// File I/O error.
    Io(std::io::Error),
    /// A lock was poisoned by a panicking thread.
    LockPoisoned,
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TxClosed => write!(f, "tx closed"),
            Self::TxNotWritable => write!(f, "tx not writable"),
            Self::TxIterating => write!(f, "tx is iterating"),
            Self::NotFound => write!(f, "not found"),
            Self::IndexExists => write!(f, "index exists"),
            Self::InvalidOperation => write!(f, "invalid operation"),
            Self::InvalidSyncPolicy => write!(f, "invalid sync policy"),
            Self::ShrinkInProcess => write!(f, "shrink is in-process"),
            Self::PersistenceActive => write!(f, "persistence active"),
            Self::DatabaseClosed => write!(f, "database closed"),
            Self::Invalid => write!(f, "invalid database"),
            Self::InvalidEncodedKey(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::LockPoisoned => write!(f, "lock poisoned"),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidEncodedKey(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for DbError {
    fn from(e: CodecError) -> Self {
        Self::InvalidEncodedKey(e)
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}

impl DbError {
    /// Whether this error reports a log that ends in the middle of a command.
    #[must_use]
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
