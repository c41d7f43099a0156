//! Arena-backed in-memory B-tree.
//!
//! Nodes live in a `Vec` and refer to their children by [`NodeId`]. Freed
//! nodes go on a free list and are reused by later splits. There are no
//! parent pointers: insertion splits full nodes on the way down and removal
//! grows thin children on the way down, so a single descent always suffices.

use std::sync::Arc;

use crate::storage::btree::node::{Node, NodeId, find};

/// Strict "less than" ordering over tree items.
pub type Less<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Default minimum degree used by the storage engine.
pub const DEFAULT_DEGREE: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascend,
    Descend,
}

enum Removal<'a, T> {
    Min,
    Max,
    Item(&'a T),
}

/// An ordered collection of unique items.
///
/// Two items are equal when neither is less than the other. Inserting an
/// item equal to an existing one replaces it.
///
/// # Invariants
///
/// - Every node other than the root holds between `degree - 1` and
///   `2 * degree - 1` items
/// - All leaves are at the same depth
/// - `len` equals the number of items reachable from `root`
///
/// Not internally synchronized; callers provide locking.
#[derive(Clone)]
pub struct BTree<T> {
    degree: usize,
    less: Less<T>,
    nodes: Vec<Node<T>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    len: usize,
}

impl<T> std::fmt::Debug for BTree<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("degree", &self.degree)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<T> BTree<T> {
    /// Create an empty tree.
    ///
    /// # Pre-conditions
    ///
    /// - `degree >= 2`
    #[must_use]
    pub fn new(degree: usize, less: Less<T>) -> Self {
        assert!(degree >= 2, "btree degree must be at least 2");
        Self {
            degree,
            less,
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }

    /// Create an empty tree with the same degree and ordering.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone shares the ordering with the copy
    pub fn clear_copy(&self) -> Self {
        Self::new(self.degree, Arc::clone(&self.less))
    }

    /// The ordering used by this tree.
    #[must_use]
    pub const fn less(&self) -> &Less<T> {
        &self.less
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove every item.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.len = 0;
    }

    const fn max_items(&self) -> usize {
        self.degree * 2 - 1
    }

    const fn min_items(&self) -> usize {
        self.degree - 1
    }

    fn alloc(&mut self, node: Node<T>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = node;
            id
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = Node::empty();
        self.free.push(id);
    }

    /// Insert `item`, returning the equal item it replaced, if any.
    pub fn replace_or_insert(&mut self, item: T) -> Option<T> {
        let Some(mut root) = self.root else {
            self.root = Some(self.alloc(Node::leaf(item)));
            self.len = 1;
            return None;
        };
        if self.nodes[root].items.len() >= self.max_items() {
            let (middle, second) = self.split(root, self.max_items() / 2);
            let new_root = Node {
                items: vec![middle],
                children: vec![root, second],
            };
            root = self.alloc(new_root);
            self.root = Some(root);
        }
        let out = self.insert(root, item);
        if out.is_none() {
            self.len += 1;
        }
        out
    }

    /// Split node `id` at item `i`. Returns the item at `i` and the new node
    /// holding everything after it.
    fn split(&mut self, id: NodeId, i: usize) -> (T, NodeId) {
        let node = &mut self.nodes[id];
        let items = node.items.split_off(i + 1);
        let children = if node.is_leaf() {
            Vec::new()
        } else {
            node.children.split_off(i + 1)
        };
        let Some(middle) = node.items.pop() else {
            unreachable!("split of a node without items");
        };
        let next = self.alloc(Node { items, children });
        (middle, next)
    }

    /// Split child `i` of `id` if it is full. Returns whether a split happened.
    fn maybe_split_child(&mut self, id: NodeId, i: usize) -> bool {
        let child = self.nodes[id].children[i];
        if self.nodes[child].items.len() < self.max_items() {
            return false;
        }
        let (middle, second) = self.split(child, self.max_items() / 2);
        let node = &mut self.nodes[id];
        node.items.insert(i, middle);
        node.children.insert(i + 1, second);
        true
    }

    fn insert(&mut self, mut id: NodeId, item: T) -> Option<T> {
        loop {
            let (mut i, found) = find(&self.nodes[id].items, &item, &*self.less);
            if found {
                return Some(std::mem::replace(&mut self.nodes[id].items[i], item));
            }
            if self.nodes[id].is_leaf() {
                self.nodes[id].items.insert(i, item);
                return None;
            }
            if self.maybe_split_child(id, i) {
                let in_tree = &self.nodes[id].items[i];
                if (self.less)(in_tree, &item) {
                    i += 1;
                } else if !(self.less)(&item, in_tree) {
                    return Some(std::mem::replace(&mut self.nodes[id].items[i], item));
                }
            }
            id = self.nodes[id].children[i];
        }
    }

    /// Look up the item equal to `key`.
    #[must_use]
    pub fn get(&self, key: &T) -> Option<&T> {
        let mut id = self.root?;
        loop {
            let node = &self.nodes[id];
            let (i, found) = find(&node.items, key, &*self.less);
            if found {
                return Some(&node.items[i]);
            }
            if node.is_leaf() {
                return None;
            }
            id = node.children[i];
        }
    }

    #[must_use]
    pub fn min(&self) -> Option<&T> {
        let mut id = self.root?;
        loop {
            let node = &self.nodes[id];
            if node.is_leaf() {
                return node.items.first();
            }
            id = node.children[0];
        }
    }

    #[must_use]
    pub fn max(&self) -> Option<&T> {
        let mut id = self.root?;
        loop {
            let node = &self.nodes[id];
            if node.is_leaf() {
                return node.items.last();
            }
            id = node.children[node.children.len() - 1];
        }
    }

    /// Remove the item equal to `key`, returning it.
    pub fn delete(&mut self, key: &T) -> Option<T> {
        self.delete_item(&Removal::Item(key))
    }

    /// Remove and return the smallest item.
    pub fn delete_min(&mut self) -> Option<T> {
        self.delete_item(&Removal::Min)
    }

    /// Remove and return the largest item.
    pub fn delete_max(&mut self) -> Option<T> {
        self.delete_item(&Removal::Max)
    }

    fn delete_item(&mut self, removal: &Removal<'_, T>) -> Option<T> {
        let root = self.root?;
        if self.nodes[root].items.is_empty() {
            return None;
        }
        let out = self.remove(root, removal);
        let node = &self.nodes[root];
        if node.items.is_empty() && !node.is_leaf() {
            let child = node.children[0];
            self.release(root);
            self.root = Some(child);
        }
        if out.is_some() {
            self.len -= 1;
        }
        out
    }

    fn remove(&mut self, id: NodeId, removal: &Removal<'_, T>) -> Option<T> {
        let leaf = self.nodes[id].is_leaf();
        let (i, found) = match removal {
            Removal::Max => {
                if leaf {
                    return self.nodes[id].items.pop();
                }
                (self.nodes[id].items.len(), false)
            }
            Removal::Min => {
                if leaf {
                    let items = &mut self.nodes[id].items;
                    return if items.is_empty() {
                        None
                    } else {
                        Some(items.remove(0))
                    };
                }
                (0, false)
            }
            Removal::Item(key) => {
                let (i, found) = find(&self.nodes[id].items, key, &*self.less);
                if leaf {
                    return found.then(|| self.nodes[id].items.remove(i));
                }
                (i, found)
            }
        };
        let child = self.nodes[id].children[i];
        if self.nodes[child].items.len() <= self.min_items() {
            return self.grow_child_and_remove(id, i, removal);
        }
        if found {
            // Replace with the in-order predecessor; the child has spare items.
            let predecessor = self.remove(child, &Removal::Max)?;
            return Some(std::mem::replace(
                &mut self.nodes[id].items[i],
                predecessor,
            ));
        }
        self.remove(child, removal)
    }

    /// Give child `i` of `id` an extra item, by stealing from a sibling or
    /// merging with one, then retry the removal from `id`.
    fn grow_child_and_remove(
        &mut self,
        id: NodeId,
        mut i: usize,
        removal: &Removal<'_, T>,
    ) -> Option<T> {
        let min = self.min_items();
        let children = &self.nodes[id].children;
        if i > 0 && self.nodes[children[i - 1]].items.len() > min {
            let (child, left) = (children[i], children[i - 1]);
            let stolen = self.nodes[left].items.pop()?;
            let separator = std::mem::replace(&mut self.nodes[id].items[i - 1], stolen);
            self.nodes[child].items.insert(0, separator);
            if let Some(grandchild) = self.nodes[left].children.pop() {
                self.nodes[child].children.insert(0, grandchild);
            }
        } else if i < self.nodes[id].items.len() && self.nodes[children[i + 1]].items.len() > min {
            let (child, right) = (children[i], children[i + 1]);
            let stolen = self.nodes[right].items.remove(0);
            let separator = std::mem::replace(&mut self.nodes[id].items[i], stolen);
            self.nodes[child].items.push(separator);
            if !self.nodes[right].is_leaf() {
                let grandchild = self.nodes[right].children.remove(0);
                self.nodes[child].children.push(grandchild);
            }
        } else {
            if i >= self.nodes[id].items.len() {
                i -= 1;
            }
            let node = &mut self.nodes[id];
            let child = node.children[i];
            let separator = node.items.remove(i);
            let merged = node.children.remove(i + 1);
            let Node { items, children } = std::mem::replace(&mut self.nodes[merged], Node::empty());
            let target = &mut self.nodes[child];
            target.items.push(separator);
            target.items.extend(items);
            target.children.extend(children);
            self.release(merged);
        }
        self.remove(id, removal)
    }

    /// Visit every item in ascending order until `visit` returns false.
    pub fn ascend<F: FnMut(&T) -> bool>(&self, mut visit: F) {
        self.walk(Direction::Ascend, None, None, false, &mut visit);
    }

    /// Visit items in `[greater_or_equal, less_than)` in ascending order.
    pub fn ascend_range<F: FnMut(&T) -> bool>(
        &self,
        greater_or_equal: &T,
        less_than: &T,
        mut visit: F,
    ) {
        self.walk(
            Direction::Ascend,
            Some(greater_or_equal),
            Some(less_than),
            true,
            &mut visit,
        );
    }

    /// Visit items `>= pivot` in ascending order.
    pub fn ascend_greater_or_equal<F: FnMut(&T) -> bool>(&self, pivot: &T, mut visit: F) {
        self.walk(Direction::Ascend, Some(pivot), None, true, &mut visit);
    }

    /// Visit items `< pivot` in ascending order.
    pub fn ascend_less_than<F: FnMut(&T) -> bool>(&self, pivot: &T, mut visit: F) {
        self.walk(Direction::Ascend, None, Some(pivot), false, &mut visit);
    }

    /// Visit every item in descending order until `visit` returns false.
    pub fn descend<F: FnMut(&T) -> bool>(&self, mut visit: F) {
        self.walk(Direction::Descend, None, None, false, &mut visit);
    }

    /// Visit items in `(greater_than, less_or_equal]` in descending order.
    pub fn descend_range<F: FnMut(&T) -> bool>(
        &self,
        less_or_equal: &T,
        greater_than: &T,
        mut visit: F,
    ) {
        self.walk(
            Direction::Descend,
            Some(less_or_equal),
            Some(greater_than),
            true,
            &mut visit,
        );
    }

    /// Visit items `<= pivot` in descending order.
    pub fn descend_less_or_equal<F: FnMut(&T) -> bool>(&self, pivot: &T, mut visit: F) {
        self.walk(Direction::Descend, Some(pivot), None, true, &mut visit);
    }

    /// Visit items `> pivot` in descending order.
    pub fn descend_greater_than<F: FnMut(&T) -> bool>(&self, pivot: &T, mut visit: F) {
        self.walk(Direction::Descend, None, Some(pivot), false, &mut visit);
    }

    fn walk<F: FnMut(&T) -> bool>(
        &self,
        dir: Direction,
        start: Option<&T>,
        stop: Option<&T>,
        include_start: bool,
        visit: &mut F,
    ) {
        if let Some(root) = self.root {
            self.iterate(root, dir, start, stop, include_start, false, visit);
        }
    }

    /// Recursive traversal. Returns `(hit, keep_going)`; `hit` records that
    /// the start item has been passed, so an excluded start is skipped once.
    #[allow(clippy::too_many_arguments)]
    fn iterate<F: FnMut(&T) -> bool>(
        &self,
        id: NodeId,
        dir: Direction,
        start: Option<&T>,
        stop: Option<&T>,
        include_start: bool,
        mut hit: bool,
        visit: &mut F,
    ) -> (bool, bool) {
        let less = &*self.less;
        let node = &self.nodes[id];
        let mut ok;
        match dir {
            Direction::Ascend => {
                let index = start.map_or(0, |s| find(&node.items, s, less).0);
                for i in index..node.items.len() {
                    if !node.is_leaf() {
                        (hit, ok) = self.iterate(
                            node.children[i],
                            dir,
                            start,
                            stop,
                            include_start,
                            hit,
                            visit,
                        );
                        if !ok {
                            return (hit, false);
                        }
                    }
                    let item = &node.items[i];
                    if !include_start && !hit && start.is_some_and(|s| !less(s, item)) {
                        hit = true;
                        continue;
                    }
                    hit = true;
                    if stop.is_some_and(|s| !less(item, s)) {
                        return (hit, false);
                    }
                    if !visit(item) {
                        return (hit, false);
                    }
                }
                if let Some(&last) = node.children.last() {
                    (hit, ok) = self.iterate(last, dir, start, stop, include_start, hit, visit);
                    if !ok {
                        return (hit, false);
                    }
                }
            }
            Direction::Descend => {
                let end = match start {
                    Some(s) => match find(&node.items, s, less) {
                        (i, true) => Some(i),
                        (i, false) => i.checked_sub(1),
                    },
                    None => node.items.len().checked_sub(1),
                };
                if let Some(end) = end {
                    for i in (0..=end).rev() {
                        let item = &node.items[i];
                        if let Some(s) = start
                            && !less(item, s)
                            && (!include_start || hit || less(s, item))
                        {
                            continue;
                        }
                        if !node.is_leaf() {
                            (hit, ok) = self.iterate(
                                node.children[i + 1],
                                dir,
                                start,
                                stop,
                                include_start,
                                hit,
                                visit,
                            );
                            if !ok {
                                return (hit, false);
                            }
                        }
                        if stop.is_some_and(|s| !less(s, item)) {
                            return (hit, false);
                        }
                        hit = true;
                        if !visit(item) {
                            return (hit, false);
                        }
                    }
                }
                if let Some(&first) = node.children.first() {
                    (hit, ok) = self.iterate(first, dir, start, stop, include_start, hit, visit);
                    if !ok {
                        return (hit, false);
                    }
                }
            }
        }
        (hit, true)
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        fn depth_of<T>(
            tree: &BTree<T>,
            id: NodeId,
            is_root: bool,
            depths: &mut Vec<usize>,
            depth: usize,
        ) -> usize {
            let node = &tree.nodes[id];
            assert!(node.items.len() <= tree.max_items(), "node overfull");
            if !is_root {
                assert!(node.items.len() >= tree.min_items(), "node underfull");
            }
            for pair in node.items.windows(2) {
                assert!((tree.less)(&pair[0], &pair[1]), "node items out of order");
            }
            if node.is_leaf() {
                depths.push(depth);
                return node.items.len();
            }
            assert_eq!(node.children.len(), node.items.len() + 1);
            let mut count = node.items.len();
            for &child in &node.children {
                count += depth_of(tree, child, false, depths, depth + 1);
            }
            count
        }

        let Some(root) = self.root else {
            assert_eq!(self.len, 0);
            return;
        };
        let mut depths = Vec::new();
        let count = depth_of(self, root, true, &mut depths, 0);
        assert_eq!(count, self.len, "len out of sync");
        assert!(depths.windows(2).all(|w| w[0] == w[1]), "leaves at different depths");
    }
}
