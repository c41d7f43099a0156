//! Memcomparable key encoding.
//!
//! Byte strings are written in groups of [`GROUP_SIZE`] bytes, each followed
//! by a marker byte. Full groups carry the marker `0xFF`; the final group is
//! zero-padded and its marker is `0xFF - pad_count`. The result compares
//! byte-wise in the same order as the input, and no encoding is a prefix of
//! another, so further fields can be appended after it.
//!
//! A versioned ("MVCC") key is the encoded raw key followed by the version as
//! a descending big-endian `u64`, which puts newer versions of one key first.
//!
//! # Invariants
//!
//! - `encode_bytes(a) < encode_bytes(b)` iff `a < b`
//! - `mvcc_encode(a, va) < mvcc_encode(b, vb)` iff `a < b`, or `a == b` and `va > vb`
//! - Decoders never panic on malformed input

/// Number of data bytes per group.
pub const GROUP_SIZE: usize = 8;
/// Marker written after a full group.
const MARKER: u8 = 0xFF;
/// Padding byte used by the ascending encoding.
const PAD: u8 = 0x00;

/// Error returned when an encoded key is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remain than the next field needs.
    InsufficientBytes { needed: usize, remaining: usize },
    /// A group marker implies more padding than a group holds.
    InvalidMarker(u8),
    /// Padding bytes in the final group are not the padding byte.
    InvalidPadding,
    /// Bytes remain after the version of an MVCC key.
    TrailingBytes(usize),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientBytes { needed, remaining } => write!(
                f,
                "invalid encoded key: need {needed} bytes, {remaining} remaining"
            ),
            Self::InvalidMarker(marker) => write!(f, "invalid encoded key: bad marker {marker:#04x}"),
            Self::InvalidPadding => write!(f, "invalid encoded key: bad padding"),
            Self::TrailingBytes(n) => write!(f, "invalid encoded key: {n} trailing bytes"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Length of `encode_bytes` output for an input of `len` bytes.
#[must_use]
pub const fn encoded_bytes_len(len: usize) -> usize {
    (len / GROUP_SIZE + 1) * (GROUP_SIZE + 1)
}

/// Encode `data` so that the output sorts like the input.
#[must_use]
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_bytes_len(data.len()));
    append_bytes(&mut out, data);
    out
}

/// Append the ascending encoding of `data` to `out`.
pub fn append_bytes(out: &mut Vec<u8>, data: &[u8]) {
    let mut idx = 0;
    while idx <= data.len() {
        let remain = data.len() - idx;
        if remain >= GROUP_SIZE {
            out.extend_from_slice(&data[idx..idx + GROUP_SIZE]);
            out.push(MARKER);
        } else {
            let pad = GROUP_SIZE - remain;
            out.extend_from_slice(&data[idx..]);
            out.resize(out.len() + pad, PAD);
            #[allow(clippy::cast_possible_truncation)]
            out.push(MARKER - pad as u8);
        }
        idx += GROUP_SIZE;
    }
}

/// Encode `data` so that the output sorts in the reverse order of the input.
#[must_use]
pub fn encode_bytes_desc(data: &[u8]) -> Vec<u8> {
    let mut out = encode_bytes(data);
    invert(&mut out);
    out
}

/// Decode a value written by [`encode_bytes`].
///
/// Returns the bytes following the encoded value and the decoded data.
pub fn decode_bytes(encoded: &[u8]) -> Result<(&[u8], Vec<u8>), CodecError> {
    decode_groups(encoded, false)
}

/// Decode a value written by [`encode_bytes_desc`].
pub fn decode_bytes_desc(encoded: &[u8]) -> Result<(&[u8], Vec<u8>), CodecError> {
    decode_groups(encoded, true)
}

fn decode_groups(mut encoded: &[u8], desc: bool) -> Result<(&[u8], Vec<u8>), CodecError> {
    let mut data = Vec::with_capacity(encoded.len());
    let pad_byte = if desc { !PAD } else { PAD };
    loop {
        if encoded.len() < GROUP_SIZE + 1 {
            return Err(CodecError::InsufficientBytes {
                needed: GROUP_SIZE + 1,
                remaining: encoded.len(),
            });
        }
        let (group, rest) = encoded.split_at(GROUP_SIZE + 1);
        let marker = group[GROUP_SIZE];
        let pad = usize::from(if desc { marker } else { MARKER - marker });
        if pad > GROUP_SIZE {
            return Err(CodecError::InvalidMarker(marker));
        }
        let real = GROUP_SIZE - pad;
        data.extend_from_slice(&group[..real]);
        encoded = rest;
        if pad != 0 {
            if group[real..GROUP_SIZE].iter().any(|&b| b != pad_byte) {
                return Err(CodecError::InvalidPadding);
            }
            break;
        }
    }
    if desc {
        invert(&mut data);
    }
    Ok((encoded, data))
}

/// Encode `value` so that larger values sort first.
#[must_use]
pub const fn encode_uint_desc(value: u64) -> [u8; 8] {
    (!value).to_be_bytes()
}

/// Decode a value written by [`encode_uint_desc`].
pub fn decode_uint_desc(encoded: &[u8]) -> Result<(&[u8], u64), CodecError> {
    let Some((head, rest)) = encoded.split_first_chunk::<8>() else {
        return Err(CodecError::InsufficientBytes {
            needed: 8,
            remaining: encoded.len(),
        });
    };
    Ok((rest, !u64::from_be_bytes(*head)))
}

/// Build the versioned key for `raw` at `version`.
#[must_use]
pub fn mvcc_encode(raw: &[u8], version: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_bytes_len(raw.len()) + 8);
    append_bytes(&mut out, raw);
    out.extend_from_slice(&encode_uint_desc(version));
    out
}

/// Split a versioned key into its raw key and version.
///
/// A key with nothing after the encoded raw key is a meta key and decodes
/// with version 0.
pub fn mvcc_decode(encoded: &[u8]) -> Result<(Vec<u8>, u64), CodecError> {
    let (rest, raw) = decode_bytes(encoded)?;
    if rest.is_empty() {
        return Ok((raw, 0));
    }
    let (rest, version) = decode_uint_desc(rest)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes(rest.len()));
    }
    Ok((raw, version))
}

fn invert(bytes: &mut [u8]) {
    for b in bytes {
        *b = !*b;
    }
}
