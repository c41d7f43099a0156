//! In-memory ordered tree used for the primary key space and every
//! secondary index.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use memkv::storage::btree::BTree;
//!
//! let mut tree = BTree::new(32, Arc::new(|a: &u32, b: &u32| a < b));
//! tree.replace_or_insert(3);
//! tree.replace_or_insert(1);
//!
//! let mut seen = Vec::new();
//! tree.ascend(|x| {
//!     seen.push(*x);
//!     true
//! });
//! assert_eq!(seen, vec![1, 3]);
//! ```

mod node;
mod tree;

pub use node::NodeId;
pub use tree::{BTree, DEFAULT_DEGREE, Less};
