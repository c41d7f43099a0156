//! Append-only log format.
//!
//! The log is a sequence of RESP arrays of bulk strings, one per command:
//!
//! ```text
//! *3\r\n$3\r\nset\r\n$<len>\r\n<key>\r\n$<len>\r\n<value>\r\n
//! *2\r\n$3\r\ndel\r\n$<len>\r\n<key>\r\n
//! *1\r\n$7\r\nflushdb\r\n
//! ```
//!
//! Command names are matched case-insensitively when reading.

use std::io::{BufRead, Read};

use crate::storage::error::DbError;

/// Upper bound on the buffer reserved up front for a single bulk string.
const READ_CHUNK: usize = 4096;

/// A command read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
    FlushDb,
}

fn append_array(buf: &mut Vec<u8>, count: usize) {
    buf.push(b'*');
    buf.extend_from_slice(count.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
}

fn append_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// Append a SET command to `buf`.
pub fn append_set(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    append_array(buf, 3);
    append_bulk(buf, b"set");
    append_bulk(buf, key);
    append_bulk(buf, value);
}

/// Append a DEL command to `buf`.
pub fn append_del(buf: &mut Vec<u8>, key: &[u8]) {
    append_array(buf, 2);
    append_bulk(buf, b"del");
    append_bulk(buf, key);
}

/// Append a FLUSHDB command to `buf`.
pub fn append_flushdb(buf: &mut Vec<u8>) {
    append_array(buf, 1);
    append_bulk(buf, b"flushdb");
}

/// Reads commands from a log stream, tracking the byte offset of the end of
/// the last complete command.
pub struct CommandReader<R> {
    reader: R,
    offset: u64,
    line: Vec<u8>,
}

impl<R: BufRead> CommandReader<R> {
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            line: Vec::new(),
        }
    }

    /// Byte offset just past the last command returned by `next_command`.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next command.
    ///
    /// Returns `Ok(None)` at a clean end of stream. A stream that ends inside
    /// a command yields an `UnexpectedEof` I/O error; malformed framing or an
    /// unknown command yields [`DbError::Invalid`].
    pub fn next_command(&mut self) -> Result<Option<Command>, DbError> {
        loop {
            let mut consumed = 0u64;
            self.line.clear();
            let n = self.reader.read_until(b'\n', &mut self.line)?;
            if n == 0 {
                return Ok(None);
            }
            consumed += n as u64;
            let count = self.read_header(b'*')?;

            let mut parts = Vec::with_capacity(count.min(8));
            for _ in 0..count {
                self.line.clear();
                let n = self.reader.read_until(b'\n', &mut self.line)?;
                if n == 0 {
                    return Err(unexpected_eof());
                }
                consumed += n as u64;
                let len = self.read_header(b'$')?;
                let want = len.checked_add(2).ok_or(DbError::Invalid)?;
                let mut data = Vec::with_capacity(want.min(READ_CHUNK));
                (&mut self.reader).take(want as u64).read_to_end(&mut data)?;
                if data.len() < want {
                    return Err(unexpected_eof());
                }
                consumed += want as u64;
                if data[len..] != *b"\r\n" {
                    return Err(DbError::Invalid);
                }
                data.truncate(len);
                parts.push(data);
            }
            self.offset += consumed;

            if parts.is_empty() {
                continue;
            }
            return parse_command(parts).map(Some);
        }
    }

    /// Parse `self.line` as `<prefix><digits>\r\n`.
    fn read_header(&self, prefix: u8) -> Result<usize, DbError> {
        let line = &self.line;
        if !line.ends_with(b"\n") {
            return Err(unexpected_eof());
        }
        if line.len() < 4 || line[0] != prefix || line[line.len() - 2] != b'\r' {
            return Err(DbError::Invalid);
        }
        line[1..line.len() - 2].iter().try_fold(0usize, |n, &b| {
            if !b.is_ascii_digit() {
                return Err(DbError::Invalid);
            }
            n.checked_mul(10)
                .and_then(|n| n.checked_add(usize::from(b - b'0')))
                .ok_or(DbError::Invalid)
        })
    }
}

fn unexpected_eof() -> DbError {
    DbError::Io(std::io::ErrorKind::UnexpectedEof.into())
}

fn parse_command(mut parts: Vec<Vec<u8>>) -> Result<Command, DbError> {
    let name = &parts[0];
    if name.eq_ignore_ascii_case(b"set") {
        if parts.len() != 3 {
            return Err(DbError::Invalid);
        }
        let value = parts.pop().unwrap_or_default();
        let key = parts.pop().unwrap_or_default();
        Ok(Command::Set { key, value })
    } else if name.eq_ignore_ascii_case(b"del") {
        if parts.len() != 2 {
            return Err(DbError::Invalid);
        }
        Ok(Command::Del {
            key: parts.pop().unwrap_or_default(),
        })
    } else if name.eq_ignore_ascii_case(b"flushdb") {
        Ok(Command::FlushDb)
    } else {
        Err(DbError::Invalid)
    }
}
