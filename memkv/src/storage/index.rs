//! Secondary indexes.
//!
//! An index keeps its own ordered tree of the records whose key matches the
//! index pattern, sorted by a caller-supplied ordering. Ties in that ordering
//! are broken by the encoded key, so every record appears in an index at
//! most once.

use std::sync::Arc;

use crate::storage::btree::{BTree, DEFAULT_DEGREE, Less};
use crate::storage::pattern::glob_match;
use crate::storage::record::Record;

/// Strict ordering over records used by an index.
pub type LessFn = Arc<dyn Fn(&Record, &Record) -> bool + Send + Sync>;

/// Wrap a function as a [`LessFn`].
pub fn less<F>(f: F) -> LessFn
where
    F: Fn(&Record, &Record) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Combine orderings lexicographically.
///
/// The first ordering that distinguishes two records decides; the last one
/// is authoritative. Returns `None` for an empty list.
#[must_use]
pub fn compose(mut lessers: Vec<LessFn>) -> Option<LessFn> {
    let last = lessers.pop()?;
    if lessers.is_empty() {
        return Some(last);
    }
    Some(Arc::new(move |a: &Record, b: &Record| {
        for f in &lessers {
            if f(a, b) {
                return true;
            }
            if f(b, a) {
                return false;
            }
        }
        last(a, b)
    }))
}

/// Reverse an ordering.
#[must_use]
pub fn desc(f: LessFn) -> LessFn {
    Arc::new(move |a: &Record, b: &Record| f(b, a))
}

/// Orders by encoded key.
#[must_use]
pub fn index_key(a: &Record, b: &Record) -> bool {
    a.key < b.key
}

/// Orders by raw key.
#[must_use]
pub fn index_raw_key(a: &Record, b: &Record) -> bool {
    a.raw_key < b.raw_key
}

/// Orders by raw key length.
#[must_use]
pub fn index_raw_key_len(a: &Record, b: &Record) -> bool {
    a.raw_key.len() < b.raw_key.len()
}

/// Orders by start timestamp.
#[must_use]
pub const fn index_start_ts(a: &Record, b: &Record) -> bool {
    a.start_ts < b.start_ts
}

/// Orders by commit timestamp.
#[must_use]
pub const fn index_commit_ts(a: &Record, b: &Record) -> bool {
    a.commit_ts < b.commit_ts
}

/// Options for index creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Match the pattern against keys case-insensitively.
    pub case_insensitive_key_matching: bool,
}

/// A named secondary index.
#[derive(Clone)]
pub struct Index {
    name: String,
    pattern: String,
    less: Option<LessFn>,
    opts: IndexOptions,
    tree: Option<BTree<Arc<Record>>>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("opts", &self.opts)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Index {
    /// Create an empty index. An index without an ordering holds nothing.
    #[must_use]
    pub fn new(name: &str, pattern: &str, opts: IndexOptions, less: Option<LessFn>) -> Self {
        let pattern = if opts.case_insensitive_key_matching {
            pattern.to_lowercase()
        } else {
            pattern.to_string()
        };
        let tree = less.clone().map(|l| BTree::new(DEFAULT_DEGREE, tree_less(l)));
        Self {
            name: name.to_string(),
            pattern,
            less,
            opts,
            tree,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub const fn less(&self) -> Option<&LessFn> {
        self.less.as_ref()
    }

    #[must_use]
    pub const fn options(&self) -> IndexOptions {
        self.opts
    }

    #[must_use]
    pub const fn tree(&self) -> Option<&BTree<Arc<Record>>> {
        self.tree.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.as_ref().map_or(0, BTree::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `record` belongs in this index.
    ///
    /// The pattern is matched against the raw key, or the stored key for
    /// records without one.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        matches_key(&self.pattern, self.opts, record)
    }

    /// A copy with the same definition and no items.
    #[must_use]
    pub fn clear_copy(&self) -> Self {
        Self {
            name: self.name.clone(),
            pattern: self.pattern.clone(),
            less: self.less.clone(),
            opts: self.opts,
            tree: self.tree.as_ref().map(BTree::clear_copy),
        }
    }

    /// Refill the index from the primary tree.
    #[allow(clippy::disallowed_methods)] // Arc::clone shares records with the primary tree
    pub fn rebuild(&mut self, keys: &BTree<Arc<Record>>) {
        let Some(tree) = self.tree.as_mut() else {
            return;
        };
        tree.clear();
        let (pattern, opts) = (&self.pattern, self.opts);
        keys.ascend(|record| {
            if matches_key(pattern, opts, record) {
                tree.replace_or_insert(Arc::clone(record));
            }
            true
        });
    }

    /// Add `record` if it matches the pattern.
    #[allow(clippy::disallowed_methods)] // Arc::clone shares records with the primary tree
    pub fn insert(&mut self, record: &Arc<Record>) {
        if !self.matches(record) {
            return;
        }
        if let Some(tree) = self.tree.as_mut() {
            tree.replace_or_insert(Arc::clone(record));
        }
    }

    /// Remove `record`, which must be the exact record previously inserted.
    pub fn remove(&mut self, record: &Arc<Record>) {
        if let Some(tree) = self.tree.as_mut() {
            tree.delete(record);
        }
    }
}

fn matches_key(pattern: &str, opts: IndexOptions, record: &Record) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    let key = if record.raw_key.is_empty() {
        &record.key
    } else {
        &record.raw_key
    };
    let key = String::from_utf8_lossy(key);
    if opts.case_insensitive_key_matching {
        glob_match(pattern, &key.to_lowercase())
    } else {
        glob_match(pattern, &key)
    }
}

fn tree_less(less: LessFn) -> Less<Arc<Record>> {
    Arc::new(move |a: &Arc<Record>, b: &Arc<Record>| {
        if less(a, b) {
            return true;
        }
        if less(b, a) {
            return false;
        }
        a.key < b.key
    })
}
