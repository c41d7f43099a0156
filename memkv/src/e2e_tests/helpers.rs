//! Common helpers for end-to-end tests.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::storage::{Database, LessFn, Record, glob_match};

/// Every record of the primary tree as `(key, value)`, in key order.
pub fn snapshot(db: &Database) -> Vec<(Vec<u8>, Vec<u8>)> {
    db.range(b"", b"")
        .expect("range")
        .iter()
        .map(|r| (r.key.clone(), r.value.clone()))
        .collect()
}

/// Stored keys of an index, in index order.
pub fn index_keys(db: &Database, index: &str) -> Vec<Vec<u8>> {
    db.view(|tx| {
        let mut keys = Vec::new();
        tx.ascend(index, |r| {
            keys.push(r.key.clone());
            true
        })?;
        Ok(keys)
    })
    .expect("ascend index")
}

/// What an index over `pattern` ordered by `less` must hold: the matching
/// primary records, sorted with ties broken by key.
pub fn expected_index_keys(db: &Database, pattern: &str, less: &LessFn) -> Vec<Vec<u8>> {
    let mut records: Vec<Arc<Record>> = db
        .range(b"", b"")
        .expect("range")
        .into_iter()
        .filter(|r| {
            let key = if r.raw_key.is_empty() { &r.key } else { &r.raw_key };
            glob_match(pattern, &String::from_utf8_lossy(key))
        })
        .collect();
    records.sort_by(|a, b| {
        if less(&**a, &**b) {
            Ordering::Less
        } else if less(&**b, &**a) {
            Ordering::Greater
        } else {
            a.key.cmp(&b.key)
        }
    });
    records.into_iter().map(|r| r.key.clone()).collect()
}
