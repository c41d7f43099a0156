//! Tree nodes and in-node search.

/// Handle of a node inside the tree arena.
pub type NodeId = usize;

/// A single B-tree node.
///
/// # Invariants
///
/// - `items` is sorted by the owning tree's ordering
/// - Internal nodes have exactly `items.len() + 1` children
/// - Everything under `children[i]` sorts before `items[i]`, everything under
///   `children[i + 1]` sorts after it
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub items: Vec<T>,
    pub children: Vec<NodeId>,
}

impl<T> Node<T> {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn leaf(item: T) -> Self {
        Self {
            items: vec![item],
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Find where `item` belongs in `items`.
///
/// Returns `(index, true)` when an equal item sits at `index`, otherwise the
/// index at which `item` would be inserted and `false`.
pub fn find<T>(items: &[T], item: &T, less: &dyn Fn(&T, &T) -> bool) -> (usize, bool) {
    let i = items.partition_point(|x| !less(item, x));
    if i > 0 && !less(&items[i - 1], item) {
        return (i - 1, true);
    }
    (i, false)
}
