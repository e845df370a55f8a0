//! Order-`m` B+ tree (spec §4.2).
//!
//! `m` is the minimum degree: every non-root node holds between `m - 1`
//! and `2m - 1` keys. Leaves are chained left-to-right for range scans.
//! Values live only in leaves; internal node keys are routing copies.
//!
//! Deletion was left unspecified by the system this crate replaces. This
//! implementation uses the standard textbook discipline: borrow a key
//! from a sibling when possible, merge with a sibling otherwise, and
//! collapse the root when it is left with zero keys and one child.

use std::cmp::Ordering;

type NodeId = usize;

enum NodeKind<K, V> {
    Leaf {
        keys: Vec<K>,
        values: Vec<V>,
        next: Option<NodeId>,
    },
    Internal {
        keys: Vec<K>,
        children: Vec<NodeId>,
    },
}

struct Node<K, V> {
    kind: NodeKind<K, V>,
}

/// An order-`m` B+ tree mapping sorted keys to values.
pub struct BPlusTree<K, V> {
    order: usize,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<NodeId>,
    root: NodeId,
    len: usize,
}

impl<K: Ord + Clone, V: Clone> BPlusTree<K, V> {
    pub fn new(order: usize) -> Self {
        assert!(order >= 2, "B+ tree order must be >= 2");
        let root_node = Node {
            kind: NodeKind::Leaf {
                keys: Vec::new(),
                values: Vec::new(),
                next: None,
            },
        };
        Self {
            order,
            nodes: vec![Some(root_node)],
            free: Vec::new(),
            root: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn max_keys(&self) -> usize {
        2 * self.order - 1
    }

    fn min_keys(&self) -> usize {
        self.order - 1
    }

    fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn node(&self, id: NodeId) -> &Node<K, V> {
        self.nodes[id].as_ref().expect("dangling node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        self.nodes[id].as_mut().expect("dangling node id")
    }

    /// Point lookup.
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut id = self.root;
        loop {
            match &self.node(id).kind {
                NodeKind::Leaf { keys, values, .. } => {
                    return keys
                        .binary_search(key)
                        .ok()
                        .map(|idx| &values[idx]);
                }
                NodeKind::Internal { keys, children } => {
                    let idx = Self::child_index(keys, key);
                    id = children[idx];
                }
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of keys (inclusive) less than `key`, used to pick which
    /// child subtree routes to `key`.
    fn child_index(keys: &[K], key: &K) -> usize {
        match keys.binary_search(key) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// Insert or update `key` with `value`. Returns the previous value if
    /// the key already existed.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let (prev, split) = self.insert_recursive(self.root, key, value);
        if let Some((sep, right_id)) = split {
            let new_root = Node {
                kind: NodeKind::Internal {
                    keys: vec![sep],
                    children: vec![self.root, right_id],
                },
            };
            self.root = self.alloc(new_root);
        }
        if prev.is_none() {
            self.len += 1;
        }
        prev
    }

    fn insert_recursive(
        &mut self,
        id: NodeId,
        key: K,
        value: V,
    ) -> (Option<V>, Option<(K, NodeId)>) {
        let max_keys = self.max_keys();
        match &mut self.node_mut(id).kind {
            NodeKind::Leaf { keys, values, .. } => match keys.binary_search(&key) {
                Ok(idx) => {
                    let prev = std::mem::replace(&mut values[idx], value);
                    (Some(prev), None)
                }
                Err(idx) => {
                    keys.insert(idx, key);
                    values.insert(idx, value);
                    if keys.len() > max_keys {
                        (None, Some(self.split_leaf(id)))
                    } else {
                        (None, None)
                    }
                }
            },
            NodeKind::Internal { keys, .. } => {
                let idx = Self::child_index(keys, &key);
                let child_id = match &self.node(id).kind {
                    NodeKind::Internal { children, .. } => children[idx],
                    _ => unreachable!(),
                };
                let (prev, split) = self.insert_recursive(child_id, key, value);
                if let Some((sep, right_id)) = split {
                    if let NodeKind::Internal { keys, children } = &mut self.node_mut(id).kind {
                        keys.insert(idx, sep);
                        children.insert(idx + 1, right_id);
                    }
                    if self.key_count(id) > max_keys {
                        (prev, Some(self.split_internal(id)))
                    } else {
                        (prev, None)
                    }
                } else {
                    (prev, None)
                }
            }
        }
    }

    fn key_count(&self, id: NodeId) -> usize {
        match &self.node(id).kind {
            NodeKind::Leaf { keys, .. } => keys.len(),
            NodeKind::Internal { keys, .. } => keys.len(),
        }
    }

    fn split_leaf(&mut self, id: NodeId) -> (K, NodeId) {
        let (right_keys, right_values, old_next) =
            match &mut self.node_mut(id).kind {
                NodeKind::Leaf { keys, values, next } => {
                    let mid = keys.len() / 2;
                    let right_keys = keys.split_off(mid);
                    let right_values = values.split_off(mid);
                    (right_keys, right_values, *next)
                }
                _ => unreachable!(),
            };
        let sep = right_keys[0].clone();
        let right_node = Node {
            kind: NodeKind::Leaf {
                keys: right_keys,
                values: right_values,
                next: old_next,
            },
        };
        let right_id = self.alloc(right_node);
        if let NodeKind::Leaf { next, .. } = &mut self.node_mut(id).kind {
            *next = Some(right_id);
        }
        (sep, right_id)
    }

    fn split_internal(&mut self, id: NodeId) -> (K, NodeId) {
        let (up_key, right_keys, right_children) = match &mut self.node_mut(id).kind {
            NodeKind::Internal { keys, children } => {
                let mid = keys.len() / 2;
                let up_key = keys[mid].clone();
                let right_keys = keys.split_off(mid + 1);
                keys.truncate(mid);
                let right_children = children.split_off(mid + 1);
                (up_key, right_keys, right_children)
            }
            _ => unreachable!(),
        };
        let right_node = Node {
            kind: NodeKind::Internal {
                keys: right_keys,
                children: right_children,
            },
        };
        let right_id = self.alloc(right_node);
        (up_key, right_id)
    }

    /// Inclusive range scan over `[start, end]`, walking the leaf chain.
    pub fn range(&self, start: &K, end: &K) -> Vec<(K, V)> {
        let mut out = Vec::new();
        if start.cmp(end) == Ordering::Greater {
            return out;
        }
        let mut leaf_id = self.leftmost_leaf_for(start);
        loop {
            let (keys, values, next) = match &self.node(leaf_id).kind {
                NodeKind::Leaf { keys, values, next } => (keys, values, *next),
                _ => unreachable!(),
            };
            for (k, v) in keys.iter().zip(values.iter()) {
                if k >= start && k <= end {
                    out.push((k.clone(), v.clone()));
                } else if k > end {
                    return out;
                }
            }
            match next {
                Some(n) => leaf_id = n,
                None => return out,
            }
        }
    }

    fn leftmost_leaf_for(&self, key: &K) -> NodeId {
        let mut id = self.root;
        loop {
            match &self.node(id).kind {
                NodeKind::Leaf { .. } => return id,
                NodeKind::Internal { keys, children } => {
                    let idx = Self::child_index(keys, key);
                    id = children[idx];
                }
            }
        }
    }

    /// Full ordered scan (used by maintenance/rebuild passes).
    pub fn iter_all(&self) -> Vec<(K, V)> {
        let mut out = Vec::new();
        let mut id = self.leftmost_leaf();
        loop {
            let (keys, values, next) = match &self.node(id).kind {
                NodeKind::Leaf { keys, values, next } => (keys, values, *next),
                _ => unreachable!(),
            };
            out.extend(keys.iter().cloned().zip(values.iter().cloned()));
            match next {
                Some(n) => id = n,
                None => return out,
            }
        }
    }

    fn leftmost_leaf(&self) -> NodeId {
        let mut id = self.root;
        loop {
            match &self.node(id).kind {
                NodeKind::Leaf { .. } => return id,
                NodeKind::Internal { children, .. } => id = children[0],
            }
        }
    }

    /// Remove `key`, returning its value if present.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let (removed, _) = self.delete_recursive(self.root, key);
        if removed.is_some() {
            self.len -= 1;
        }
        // Collapse a root that has become a childless internal node.
        if let NodeKind::Internal { keys, children } = &self.node(self.root).kind {
            if keys.is_empty() && children.len() == 1 {
                let only_child = children[0];
                self.free.push(self.root);
                self.nodes[self.root] = None;
                self.root = only_child;
            }
        }
        removed
    }

    /// Returns `(removed_value, underflowed)`.
    fn delete_recursive(&mut self, id: NodeId, key: &K) -> (Option<V>, bool) {
        let min_keys = self.min_keys();
        let is_root = id == self.root;
        match &mut self.node_mut(id).kind {
            NodeKind::Leaf { keys, values, .. } => match keys.binary_search(key) {
                Ok(idx) => {
                    keys.remove(idx);
                    let removed = values.remove(idx);
                    let underflow = !is_root && keys.len() < min_keys;
                    (Some(removed), underflow)
                }
                Err(_) => (None, false),
            },
            NodeKind::Internal { keys, .. } => {
                let idx = Self::child_index(keys, key);
                let child_id = match &self.node(id).kind {
                    NodeKind::Internal { children, .. } => children[idx],
                    _ => unreachable!(),
                };
                let (removed, child_underflow) = self.delete_recursive(child_id, key);
                if removed.is_none() {
                    return (None, false);
                }
                if child_underflow {
                    self.fix_underflow(id, idx);
                }
                let underflow = !is_root && self.key_count(id) < min_keys;
                (removed, underflow)
            }
        }
    }

    /// Rebalance child `idx` of internal node `parent_id` after it underflowed,
    /// by borrowing from a sibling or merging with one.
    fn fix_underflow(&mut self, parent_id: NodeId, idx: usize) {
        let (left_sibling, right_sibling) = {
            let children = match &self.node(parent_id).kind {
                NodeKind::Internal { children, .. } => children,
                _ => unreachable!(),
            };
            (
                idx.checked_sub(1).map(|i| children[i]),
                children.get(idx + 1).copied(),
            )
        };
        let min_keys = self.min_keys();

        if let Some(left_id) = left_sibling {
            if self.key_count(left_id) > min_keys {
                self.borrow_from_left(parent_id, idx, left_id);
                return;
            }
        }
        if let Some(right_id) = right_sibling {
            if self.key_count(right_id) > min_keys {
                self.borrow_from_right(parent_id, idx, right_id);
                return;
            }
        }
        if let Some(left_id) = left_sibling {
            self.merge(parent_id, idx - 1, left_id, idx);
        } else if let Some(right_id) = right_sibling {
            self.merge(parent_id, idx, idx, right_id);
        }
    }

    fn borrow_from_left(&mut self, parent_id: NodeId, child_idx: usize, left_id: NodeId) {
        let child_id = match &self.node(parent_id).kind {
            NodeKind::Internal { children, .. } => children[child_idx],
            _ => unreachable!(),
        };
        let both_leaves = matches!(self.node(left_id).kind, NodeKind::Leaf { .. });
        if both_leaves {
            let (borrowed_key, borrowed_val) = match &mut self.node_mut(left_id).kind {
                NodeKind::Leaf { keys, values, .. } => {
                    (keys.pop().unwrap(), values.pop().unwrap())
                }
                _ => unreachable!(),
            };
            if let NodeKind::Leaf { keys, values, .. } = &mut self.node_mut(child_id).kind {
                keys.insert(0, borrowed_key.clone());
                values.insert(0, borrowed_val);
            }
            if let NodeKind::Internal { keys, .. } = &mut self.node_mut(parent_id).kind {
                keys[child_idx - 1] = borrowed_key;
            }
        } else {
            let (borrowed_child, left_last_key) = match &mut self.node_mut(left_id).kind {
                NodeKind::Internal { keys, children } => {
                    (children.pop().unwrap(), keys.pop().unwrap())
                }
                _ => unreachable!(),
            };
            let separator = match &self.node(parent_id).kind {
                NodeKind::Internal { keys, .. } => keys[child_idx - 1].clone(),
                _ => unreachable!(),
            };
            if let NodeKind::Internal { keys, children } = &mut self.node_mut(child_id).kind {
                keys.insert(0, separator);
                children.insert(0, borrowed_child);
            }
            if let NodeKind::Internal { keys, .. } = &mut self.node_mut(parent_id).kind {
                keys[child_idx - 1] = left_last_key;
            }
        }
    }

    fn borrow_from_right(&mut self, parent_id: NodeId, child_idx: usize, right_id: NodeId) {
        let child_id = match &self.node(parent_id).kind {
            NodeKind::Internal { children, .. } => children[child_idx],
            _ => unreachable!(),
        };
        let both_leaves = matches!(self.node(right_id).kind, NodeKind::Leaf { .. });
        if both_leaves {
            let (borrowed_key, borrowed_val) = match &mut self.node_mut(right_id).kind {
                NodeKind::Leaf { keys, values, .. } => {
                    (keys.remove(0), values.remove(0))
                }
                _ => unreachable!(),
            };
            let new_separator = match &self.node(right_id).kind {
                NodeKind::Leaf { keys, .. } => keys[0].clone(),
                _ => unreachable!(),
            };
            if let NodeKind::Leaf { keys, values, .. } = &mut self.node_mut(child_id).kind {
                keys.push(borrowed_key);
                values.push(borrowed_val);
            }
            if let NodeKind::Internal { keys, .. } = &mut self.node_mut(parent_id).kind {
                keys[child_idx] = new_separator;
            }
        } else {
            let (borrowed_child, right_first_key) = match &mut self.node_mut(right_id).kind {
                NodeKind::Internal { keys, children } => {
                    (children.remove(0), keys.remove(0))
                }
                _ => unreachable!(),
            };
            let separator = match &self.node(parent_id).kind {
                NodeKind::Internal { keys, .. } => keys[child_idx].clone(),
                _ => unreachable!(),
            };
            if let NodeKind::Internal { keys, children } = &mut self.node_mut(child_id).kind {
                keys.push(separator);
                children.push(borrowed_child);
            }
            if let NodeKind::Internal { keys, .. } = &mut self.node_mut(parent_id).kind {
                keys[child_idx] = right_first_key;
            }
        }
    }

    /// Merge the child at `right_idx` into the child at `left_idx`
    /// (siblings, `left_idx + 1 == right_idx`), removing separator
    /// `sep_idx` from `parent_id`.
    fn merge(&mut self, parent_id: NodeId, sep_idx: usize, left_idx: usize, right_idx: usize) {
        let (left_child, right_child) = {
            let children = match &self.node(parent_id).kind {
                NodeKind::Internal { children, .. } => children,
                _ => unreachable!(),
            };
            (children[left_idx], children[right_idx])
        };
        let both_leaves = matches!(self.node(left_child).kind, NodeKind::Leaf { .. });
        if both_leaves {
            let (right_keys, right_values, right_next) = match &mut self.node_mut(right_child).kind
            {
                NodeKind::Leaf { keys, values, next } => {
                    (std::mem::take(keys), std::mem::take(values), *next)
                }
                _ => unreachable!(),
            };
            if let NodeKind::Leaf { keys, values, next } = &mut self.node_mut(left_child).kind {
                keys.extend(right_keys);
                values.extend(right_values);
                *next = right_next;
            }
        } else {
            let separator = match &self.node(parent_id).kind {
                NodeKind::Internal { keys, .. } => keys[sep_idx].clone(),
                _ => unreachable!(),
            };
            let (right_keys, right_children) = match &mut self.node_mut(right_child).kind {
                NodeKind::Internal { keys, children } => {
                    (std::mem::take(keys), std::mem::take(children))
                }
                _ => unreachable!(),
            };
            if let NodeKind::Internal { keys, children } = &mut self.node_mut(left_child).kind {
                keys.push(separator);
                keys.extend(right_keys);
                children.extend(right_children);
            }
        }
        self.free.push(right_child);
        self.nodes[right_child] = None;
        if let NodeKind::Internal { keys, children } = &mut self.node_mut(parent_id).kind {
            keys.remove(sep_idx);
            children.remove(right_idx);
        }
    }
}
