//! Left-balanced binary tree in array form.
//!
//! Leaf `i` lives at node `2i`, parents at odd indices. A tree with `n`
//! leaves occupies `2n - 1` nodes and its root is the largest `2^k - 1`
//! that fits. All navigation is integer arithmetic over node indices.

use crate::{X25519PublicKey, X25519Secret};

/// Number of nodes in a tree with `leaf_count` leaves.
pub(crate) fn node_width(leaf_count: u32) -> u32 {
    if leaf_count == 0 {
        0
    } else {
        2 * (leaf_count - 1) + 1
    }
}

/// Height of a node above the leaves.
pub(crate) fn level(x: u32) -> u32 {
    x.trailing_ones()
}

pub(crate) fn leaf_node(leaf_index: u32) -> u32 {
    2 * leaf_index
}

pub(crate) fn root(leaf_count: u32) -> u32 {
    let width = node_width(leaf_count);
    if width == 0 {
        return 0;
    }
    (1 << width.ilog2()) - 1
}

/// Left child of a parent node. Leaves are their own left child.
pub(crate) fn left(x: u32) -> u32 {
    let k = level(x);
    if k == 0 { x } else { x ^ (1 << (k - 1)) }
}

/// Right child of a parent node, skipping positions past the right edge.
pub(crate) fn right(x: u32, leaf_count: u32) -> u32 {
    let k = level(x);
    if k == 0 {
        return x;
    }

    let width = node_width(leaf_count);
    let mut r = x ^ (3 << (k - 1));
    while r >= width {
        r = left(r);
    }
    r
}

fn parent_step(x: u32) -> u32 {
    let k = level(x);
    let b = (x >> (k + 1)) & 1;
    (x | (1 << k)) ^ (b << (k + 1))
}

/// Parent of `x`, or `None` for the root.
pub(crate) fn parent(x: u32, leaf_count: u32) -> Option<u32> {
    if x == root(leaf_count) {
        return None;
    }

    let width = node_width(leaf_count);
    let mut p = parent_step(x);
    while p >= width {
        p = parent_step(p);
    }
    Some(p)
}

pub(crate) fn sibling(x: u32, leaf_count: u32) -> Option<u32> {
    let p = parent(x, leaf_count)?;
    if x < p {
        Some(right(p, leaf_count))
    } else {
        Some(left(p))
    }
}

/// Ancestors of `x` from its parent up to and including the root.
pub(crate) fn direct_path(x: u32, leaf_count: u32) -> Vec<u32> {
    let mut path = Vec::new();
    let mut current = x;
    while let Some(p) = parent(current, leaf_count) {
        path.push(p);
        current = p;
    }
    path
}

/// Siblings of `x` and of every non-root node on its direct path. The
/// `i`-th entry is the child of `direct_path(x)[i]` that is not on the path.
pub(crate) fn copath(x: u32, leaf_count: u32) -> Vec<u32> {
    let mut path = vec![x];
    path.extend(direct_path(x, leaf_count));
    path.pop();

    path.into_iter()
        .filter_map(|node| sibling(node, leaf_count))
        .collect()
}

/// Lowest node that is an ancestor of (or equal to) both `x` and `y`.
pub(crate) fn common_ancestor(x: u32, y: u32, leaf_count: u32) -> u32 {
    let mut ancestors_of_y = vec![y];
    ancestors_of_y.extend(direct_path(y, leaf_count));

    let mut current = x;
    loop {
        if ancestors_of_y.contains(&current) {
            return current;
        }
        match parent(current, leaf_count) {
            Some(p) => current = p,
            None => return current,
        }
    }
}

/// One slot of the tree arena.
#[derive(Clone, Default)]
pub(crate) enum Node {
    #[default]
    Blank,
    Occupied {
        public_key: X25519PublicKey,
        secret: Option<X25519Secret>,
    },
}

impl Node {
    pub(crate) fn public_key(&self) -> Option<&X25519PublicKey> {
        match self {
            Self::Blank => None,
            Self::Occupied { public_key, .. } => Some(public_key),
        }
    }

    pub(crate) fn secret(&self) -> Option<&X25519Secret> {
        match self {
            Self::Blank => None,
            Self::Occupied { secret, .. } => secret.as_ref(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Self::Blank)
    }
}

/// Arena of tree nodes. Always holds `2 * leaf_count - 1` slots.
#[derive(Clone, Default)]
pub(crate) struct RatchetTree {
    nodes: Vec<Node>,
}

impl RatchetTree {
    /// Tree holding a single occupied leaf.
    pub(crate) fn with_leaf(leaf: Node) -> Self {
        Self { nodes: vec![leaf] }
    }

    /// Public tree from a list of node keys.
    pub(crate) fn from_public_keys(keys: &[Option<X25519PublicKey>]) -> Self {
        let nodes = keys
            .iter()
            .map(|key| match key {
                Some(public_key) => Node::Occupied {
                    public_key: *public_key,
                    secret: None,
                },
                None => Node::Blank,
            })
            .collect();
        Self { nodes }
    }

    pub(crate) fn public_keys(&self) -> Vec<Option<X25519PublicKey>> {
        self.nodes.iter().map(|node| node.public_key().copied()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn leaf_count(&self) -> u32 {
        u32::try_from(self.nodes.len().div_ceil(2)).unwrap_or(u32::MAX)
    }

    pub(crate) fn node(&self, x: u32) -> Option<&Node> {
        self.nodes.get(x as usize)
    }

    pub(crate) fn set(&mut self, x: u32, node: Node) {
        if let Some(slot) = self.nodes.get_mut(x as usize) {
            *slot = node;
        }
    }

    pub(crate) fn is_blank(&self, x: u32) -> bool {
        self.node(x).is_none_or(Node::is_blank)
    }

    /// Places a new leaf in the leftmost blank leaf slot, or grows the tree
    /// by one parent and one leaf on the right. Returns the leaf index.
    pub(crate) fn add_leaf(&mut self, public_key: X25519PublicKey) -> u32 {
        let leaf = Node::Occupied {
            public_key,
            secret: None,
        };

        let leaf_count = self.leaf_count();
        if let Some(index) = (0..leaf_count).find(|&i| self.is_blank(leaf_node(i))) {
            self.set(leaf_node(index), leaf);
            return index;
        }

        if !self.nodes.is_empty() {
            self.nodes.push(Node::Blank);
        }
        self.nodes.push(leaf);
        leaf_count
    }

    pub(crate) fn blank(&mut self, x: u32) {
        self.set(x, Node::Blank);
    }

    /// Blanks every ancestor of `leaf_index`. Returns the blanked nodes.
    pub(crate) fn blank_direct_path(&mut self, leaf_index: u32) -> Vec<u32> {
        let path = direct_path(leaf_node(leaf_index), self.leaf_count());
        for &x in &path {
            self.blank(x);
        }
        path
    }

    /// Drops trailing blank leaves together with the parent node that joins
    /// each of them to the tree.
    pub(crate) fn truncate(&mut self) {
        while self.nodes.len() > 1 && self.nodes.last().is_some_and(Node::is_blank) {
            self.nodes.truncate(self.nodes.len() - 2);
        }
    }

    /// Minimal set of non-blank nodes covering the subtree under `x`.
    pub(crate) fn resolution(&self, x: u32) -> Vec<u32> {
        if !self.is_blank(x) {
            return vec![x];
        }
        if level(x) == 0 {
            return Vec::new();
        }

        let leaf_count = self.leaf_count();
        let mut nodes = self.resolution(left(x));
        nodes.extend(self.resolution(right(x, leaf_count)));
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> X25519PublicKey {
        X25519PublicKey::from([byte; 32])
    }

    #[test]
    fn test_three_leaf_navigation() {
        // Nodes 0..5, root 3; leaf 2 (node 4) hangs directly off the root.
        assert_eq!(node_width(3), 5);
        assert_eq!(root(3), 3);
        assert_eq!(left(3), 1);
        assert_eq!(right(3, 3), 4);
        assert_eq!(parent(4, 3), Some(3));
        assert_eq!(parent(0, 3), Some(1));
        assert_eq!(parent(3, 3), None);
        assert_eq!(sibling(4, 3), Some(1));
        assert_eq!(direct_path(0, 3), vec![1, 3]);
        assert_eq!(copath(0, 3), vec![2, 4]);
        assert_eq!(common_ancestor(0, 2, 3), 1);
        assert_eq!(common_ancestor(2, 4, 3), 3);
    }

    #[test]
    fn test_single_and_pair() {
        assert_eq!(root(1), 0);
        assert!(direct_path(0, 1).is_empty());
        assert!(copath(0, 1).is_empty());

        assert_eq!(root(2), 1);
        assert_eq!(direct_path(2, 2), vec![1]);
        assert_eq!(sibling(0, 2), Some(2));
    }

    #[test]
    fn test_every_leaf_reaches_root() {
        for leaf_count in 1..40 {
            let width = node_width(leaf_count);
            for leaf in 0..leaf_count {
                let path = direct_path(leaf_node(leaf), leaf_count);
                assert!(path.iter().all(|&x| x < width));
                if leaf_count > 1 {
                    assert_eq!(path.last().copied(), Some(root(leaf_count)));
                }
                assert_eq!(copath(leaf_node(leaf), leaf_count).len(), path.len());
            }
        }
    }

    #[test]
    fn test_children_point_back_to_parent() {
        for leaf_count in 2..40 {
            for x in (0..node_width(leaf_count)).filter(|x| level(*x) > 0) {
                assert_eq!(parent(left(x), leaf_count), Some(x));
                assert_eq!(parent(right(x, leaf_count), leaf_count), Some(x));
            }
        }
    }

    #[test]
    fn test_add_leaf_grows_and_fills_gaps() {
        let mut tree = RatchetTree::with_leaf(Node::Occupied {
            public_key: key(1),
            secret: None,
        });
        assert_eq!(tree.add_leaf(key(2)), 1);
        assert_eq!(tree.add_leaf(key(3)), 2);
        assert_eq!(tree.len(), 5);

        tree.blank(leaf_node(1));
        assert_eq!(tree.add_leaf(key(4)), 1);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_truncate_drops_trailing_blank_leaves() {
        let mut tree = RatchetTree::with_leaf(Node::Occupied {
            public_key: key(1),
            secret: None,
        });
        for byte in 2..=4 {
            tree.add_leaf(key(byte));
        }
        assert_eq!(tree.len(), 7);

        tree.blank(leaf_node(2));
        tree.blank(leaf_node(3));
        tree.truncate();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn test_resolution_descends_through_blanks() {
        let mut tree = RatchetTree::with_leaf(Node::Occupied {
            public_key: key(1),
            secret: None,
        });
        tree.add_leaf(key(2));
        tree.add_leaf(key(3));

        assert_eq!(tree.resolution(3), vec![0, 2, 4]);

        tree.set(
            1,
            Node::Occupied {
                public_key: key(9),
                secret: None,
            },
        );
        assert_eq!(tree.resolution(3), vec![1, 4]);

        tree.blank(leaf_node(2));
        assert_eq!(tree.resolution(4), Vec::<u32>::new());
    }
}
